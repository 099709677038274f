// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Power sequences.
//!
//! A power sequence is stored in configuration as a flat array of `u32`
//! words. Each action is framed by [`ACTION_START`] and [`ACTION_END`]; the
//! word after `START` selects the action type and the remaining words up to
//! `END` are its payload:
//!
//! ```text
//! START GPIO  gpio value delay [value delay ...] END
//! START PMIC  enable delay END
//! START CLOCK enable delay END
//! ```
//!
//! Parsing is generic over an [`ActionSet`] so drivers with their own action
//! types share the framing rules. [`PowerAction`] is the set used by the
//! camera sensor.

use crate::{
    config::{PowerConfig, Regulator},
    hw::{PowerControl, SensorBus},
    Error,
};
use serde::Serialize;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

pub const ACTION_START: u32 = 0x1234_5678;
pub const ACTION_END: u32 = 0x8765_4321;
pub const ACTION_TYPE_GPIO: u32 = 0xff11_0000;
pub const ACTION_TYPE_PMIC: u32 = 0xff11_0001;
pub const ACTION_TYPE_CLOCK: u32 = 0xff11_0002;

/// Register/value pair that terminates a sensor init table.
pub const INIT_TABLE_END: [u8; 2] = [0xff, 0xff];

/// Power-sequence parse failure. `start` is the word index of the offending
/// action's START marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    /// No END marker follows a START marker
    MissingEnd { start: usize },
    /// END immediately follows START
    MissingType { start: usize },
    /// GPIO payload is not a positive, even number of value/delay words
    GpioUnits { start: usize, units: usize },
    /// PMIC or clock payload is not exactly `[enable, delay]`
    PayloadSlots {
        start: usize,
        kind: &'static str,
        slots: usize,
    },
    UnknownType { start: usize, word: u32 },
}

impl fmt::Display for SequenceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SequenceError::MissingEnd { start } => {
                write!(f, "no END marker after START at index {}", start)
            }
            SequenceError::MissingType { start } => {
                write!(f, "action at index {} has no type word", start)
            }
            SequenceError::GpioUnits { start, units } => write!(
                f,
                "GPIO action at index {} has {} value/delay words, expected a positive even count",
                start, units
            ),
            SequenceError::PayloadSlots { start, kind, slots } => write!(
                f,
                "{} action at index {} has {} payload words, expected 2",
                kind, start, slots
            ),
            SequenceError::UnknownType { start, word } => {
                write!(f, "unknown action type {:#010x} at index {}", word, start)
            }
        }
    }
}

impl std::error::Error for SequenceError {}

/// A family of action types that can be framed in a power sequence.
pub trait ActionSet: Sized {
    /// Builds one action from its type word and the payload between the
    /// type word and END.
    fn decode(start: usize, type_word: u32, payload: &[u32]) -> Result<Self, SequenceError>;

    /// Appends the type word and payload, without markers.
    fn encode(&self, out: &mut Vec<u32>);
}

/// One GPIO transition and the settle time after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GpioStep {
    pub value: u32,
    pub delay_ms: u32,
}

/// Camera sensor power actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PowerAction {
    Gpio { gpio: u32, steps: Vec<GpioStep> },
    Pmic { enable: bool, delay_ms: u32 },
    Clock { enable: bool, delay_ms: u32 },
}

fn enable_delay(
    start: usize,
    kind: &'static str,
    payload: &[u32],
) -> Result<(bool, u32), SequenceError> {
    match payload {
        [enable, delay] => Ok((*enable != 0, *delay)),
        _ => Err(SequenceError::PayloadSlots {
            start,
            kind,
            slots: payload.len(),
        }),
    }
}

impl ActionSet for PowerAction {
    fn decode(start: usize, type_word: u32, payload: &[u32]) -> Result<Self, SequenceError> {
        match type_word {
            ACTION_TYPE_GPIO => {
                let units = payload.len().saturating_sub(1);
                if units == 0 || units % 2 != 0 {
                    return Err(SequenceError::GpioUnits { start, units });
                }
                let steps = payload[1..]
                    .chunks_exact(2)
                    .map(|pair| GpioStep {
                        value: pair[0],
                        delay_ms: pair[1],
                    })
                    .collect();
                Ok(PowerAction::Gpio {
                    gpio: payload[0],
                    steps,
                })
            }
            ACTION_TYPE_PMIC => {
                let (enable, delay_ms) = enable_delay(start, "PMIC", payload)?;
                Ok(PowerAction::Pmic { enable, delay_ms })
            }
            ACTION_TYPE_CLOCK => {
                let (enable, delay_ms) = enable_delay(start, "clock", payload)?;
                Ok(PowerAction::Clock { enable, delay_ms })
            }
            word => Err(SequenceError::UnknownType { start, word }),
        }
    }

    fn encode(&self, out: &mut Vec<u32>) {
        match self {
            PowerAction::Gpio { gpio, steps } => {
                out.push(ACTION_TYPE_GPIO);
                out.push(*gpio);
                for step in steps {
                    out.push(step.value);
                    out.push(step.delay_ms);
                }
            }
            PowerAction::Pmic { enable, delay_ms } => {
                out.extend_from_slice(&[ACTION_TYPE_PMIC, u32::from(*enable), *delay_ms])
            }
            PowerAction::Clock { enable, delay_ms } => {
                out.extend_from_slice(&[ACTION_TYPE_CLOCK, u32::from(*enable), *delay_ms])
            }
        }
    }
}

fn find_mark(words: &[u32], from: usize, mark: u32) -> Option<usize> {
    words
        .get(from..)?
        .iter()
        .position(|&w| w == mark)
        .map(|i| i + from)
}

/// Walks every START..END frame, handing the type word and payload to
/// `visit`, and returns the number of frames.
fn scan<F>(words: &[u32], mut visit: F) -> Result<usize, SequenceError>
where
    F: FnMut(usize, u32, &[u32]) -> Result<(), SequenceError>,
{
    let mut pos = 0;
    let mut count = 0;
    while let Some(start) = find_mark(words, pos, ACTION_START) {
        let end = find_mark(words, start + 1, ACTION_END)
            .ok_or(SequenceError::MissingEnd { start })?;
        if end < start + 2 {
            return Err(SequenceError::MissingType { start });
        }
        visit(start, words[start + 1], &words[start + 2..end])?;
        count += 1;
        pos = end + 1;
    }
    Ok(count)
}

/// An ordered, immutable list of actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PowerSequence<A = PowerAction> {
    actions: Vec<A>,
}

impl<A> Default for PowerSequence<A> {
    fn default() -> Self {
        PowerSequence {
            actions: Vec::new(),
        }
    }
}

impl<A: ActionSet> PowerSequence<A> {
    pub fn new(actions: Vec<A>) -> Self {
        PowerSequence { actions }
    }

    /// Parses a marker-delimited word array.
    ///
    /// A first pass validates the framing and counts the actions so the
    /// second, decoding pass fills an exactly sized list. An array with no
    /// START marker yields an empty sequence.
    ///
    /// # Errors
    ///
    /// Returns the [`SequenceError`] for the first malformed action.
    ///
    /// # Example
    ///
    /// ```
    /// use rearcam::power::{PowerAction, PowerSequence, ACTION_END, ACTION_START, ACTION_TYPE_PMIC};
    ///
    /// let seq: PowerSequence = PowerSequence::parse(&[ACTION_START, ACTION_TYPE_PMIC, 1, 5, ACTION_END])?;
    /// assert_eq!(seq.actions(), &[PowerAction::Pmic { enable: true, delay_ms: 5 }]);
    /// # Ok::<(), rearcam::SequenceError>(())
    /// ```
    pub fn parse(words: &[u32]) -> Result<Self, SequenceError> {
        let count = scan(words, |_, _, _| Ok(()))?;
        let mut actions = Vec::with_capacity(count);
        scan(words, |start, type_word, payload| {
            actions.push(A::decode(start, type_word, payload)?);
            Ok(())
        })?;
        Ok(PowerSequence { actions })
    }

    /// Serializes back to the marker-delimited word format.
    pub fn encode(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for action in &self.actions {
            out.push(ACTION_START);
            action.encode(&mut out);
            out.push(ACTION_END);
        }
        out
    }
}

impl<A> PowerSequence<A> {
    pub fn actions(&self) -> &[A] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn sleep_ms(ms: u32) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

impl PowerSequence<PowerAction> {
    /// Executes every action in order, sleeping between steps.
    ///
    /// A failed action is logged and the remaining actions still run; the
    /// first failure is returned. Must not be called from an event handler.
    pub fn run(&self, control: &dyn PowerControl, regulators: &[Regulator]) -> Result<(), Error> {
        let mut first_err = None;
        for action in &self.actions {
            if let Err(err) = run_action(action, control, regulators) {
                log::error!("power action {:?} failed: {}", action, err);
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

fn run_action(
    action: &PowerAction,
    control: &dyn PowerControl,
    regulators: &[Regulator],
) -> Result<(), Error> {
    match action {
        PowerAction::Gpio { gpio, steps } => {
            for step in steps {
                log::trace!("gpio {} <- {}", gpio, step.value);
                control.set_gpio(*gpio, step.value)?;
                sleep_ms(step.delay_ms);
            }
        }
        PowerAction::Pmic { enable, delay_ms } => {
            for reg in regulators {
                if *enable {
                    if let Some(uv) = reg.microvolts {
                        if control.regulator_can_change_voltage(&reg.name) {
                            control.regulator_set_voltage(&reg.name, uv)?;
                        }
                    }
                }
                if control.regulator_is_enabled(&reg.name)? != *enable {
                    log::trace!("regulator {} -> {}", reg.name, enable);
                    control.regulator_set_enable(&reg.name, *enable)?;
                }
            }
            sleep_ms(*delay_ms);
        }
        PowerAction::Clock { enable, delay_ms } => {
            control.set_clock(*enable)?;
            sleep_ms(*delay_ms);
        }
    }
    Ok(())
}

/// Writes `[register, value]` pairs until [`INIT_TABLE_END`] or the end of
/// the table, returning the number written.
pub fn write_init_table(bus: &dyn SensorBus, table: &[[u8; 2]]) -> Result<usize, Error> {
    let mut written = 0;
    for &[reg, value] in table.iter().take_while(|&&pair| pair != INIT_TABLE_END) {
        bus.write_reg(reg, value)?;
        written += 1;
    }
    Ok(written)
}

/// Sensor power state with its enable and disable sequences.
pub struct SensorPower {
    enable: PowerSequence,
    disable: PowerSequence,
    regulators: Vec<Regulator>,
    control: Arc<dyn PowerControl>,
    enabled: AtomicBool,
}

impl SensorPower {
    pub fn new(
        enable: PowerSequence,
        disable: PowerSequence,
        regulators: Vec<Regulator>,
        control: Arc<dyn PowerControl>,
    ) -> Self {
        SensorPower {
            enable,
            disable,
            regulators,
            control,
            enabled: AtomicBool::new(false),
        }
    }

    /// Parses both sequences from configuration.
    pub fn from_config(config: &PowerConfig, control: Arc<dyn PowerControl>) -> Result<Self, Error> {
        let enable = PowerSequence::parse(&config.enable_seq)?;
        let disable = PowerSequence::parse(&config.disable_seq)?;
        log::debug!(
            "power sequences: {} enable actions, {} disable actions",
            enable.len(),
            disable.len()
        );
        Ok(Self::new(enable, disable, config.regulators.clone(), control))
    }

    pub fn enable_sequence(&self) -> &PowerSequence {
        &self.enable
    }

    pub fn disable_sequence(&self) -> &PowerSequence {
        &self.disable
    }

    /// Runs the enable or disable sequence unless the sensor is already in
    /// the requested state. Returns whether a sequence ran.
    pub fn set(&self, enable: bool) -> Result<bool, Error> {
        if self.enabled.swap(enable, Ordering::AcqRel) == enable {
            return Ok(false);
        }
        let seq = if enable { &self.enable } else { &self.disable };
        log::debug!(
            "sensor power {} ({} actions)",
            if enable { "on" } else { "off" },
            seq.len()
        );
        if let Err(err) = seq.run(self.control.as_ref(), &self.regulators) {
            self.enabled.store(!enable, Ordering::Release);
            return Err(err);
        }
        Ok(true)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SensorPower {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SensorPower")
            .field("enable", &self.enable)
            .field("disable", &self.disable)
            .field("regulators", &self.regulators)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{PowerEvent, SimBoard};

    fn gpio(gpio: u32, steps: &[(u32, u32)]) -> PowerAction {
        PowerAction::Gpio {
            gpio,
            steps: steps
                .iter()
                .map(|&(value, delay_ms)| GpioStep { value, delay_ms })
                .collect(),
        }
    }

    #[test]
    fn test_parse_gpio() {
        let words = [ACTION_START, ACTION_TYPE_GPIO, 42, 1, 0, 0, 2, ACTION_END];
        let seq: PowerSequence = PowerSequence::parse(&words).unwrap();
        assert_eq!(seq.actions(), &[gpio(42, &[(1, 0), (0, 2)])]);
    }

    #[test]
    fn test_parse_skips_words_outside_frames() {
        let words = [
            7,
            ACTION_START,
            ACTION_TYPE_CLOCK,
            1,
            3,
            ACTION_END,
            99,
            ACTION_START,
            ACTION_TYPE_PMIC,
            0,
            0,
            ACTION_END,
            5,
        ];
        let seq: PowerSequence = PowerSequence::parse(&words).unwrap();
        assert_eq!(
            seq.actions(),
            &[
                PowerAction::Clock {
                    enable: true,
                    delay_ms: 3
                },
                PowerAction::Pmic {
                    enable: false,
                    delay_ms: 0
                },
            ]
        );
    }

    fn parse(words: &[u32]) -> SequenceError {
        PowerSequence::<PowerAction>::parse(words).unwrap_err()
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse(&[ACTION_START, ACTION_TYPE_GPIO, 1, 1, 0]),
            SequenceError::MissingEnd { start: 0 }
        );
        assert_eq!(
            parse(&[0, ACTION_START, ACTION_END]),
            SequenceError::MissingType { start: 1 }
        );
        assert_eq!(
            parse(&[ACTION_START, ACTION_TYPE_GPIO, 1, ACTION_END]),
            SequenceError::GpioUnits { start: 0, units: 0 }
        );
        assert_eq!(
            parse(&[ACTION_START, ACTION_TYPE_GPIO, 1, 1, 0, 1, ACTION_END]),
            SequenceError::GpioUnits { start: 0, units: 3 }
        );
        assert_eq!(
            parse(&[ACTION_START, ACTION_TYPE_PMIC, 1, 0, 0, 0, ACTION_END]),
            SequenceError::PayloadSlots {
                start: 0,
                kind: "PMIC",
                slots: 4
            }
        );
        assert_eq!(
            parse(&[ACTION_START, 0xdead_beef, 1, 0, ACTION_END]),
            SequenceError::UnknownType {
                start: 0,
                word: 0xdead_beef
            }
        );
    }

    #[test]
    fn test_round_trip() {
        let pool = [
            gpio(3, &[(1, 0)]),
            PowerAction::Pmic {
                enable: true,
                delay_ms: 10,
            },
            PowerAction::Clock {
                enable: true,
                delay_ms: 1,
            },
            gpio(17, &[(0, 5), (1, 5), (0, 0)]),
            PowerAction::Pmic {
                enable: false,
                delay_ms: 0,
            },
        ];

        for n in [0, 1, 5] {
            let seq = PowerSequence::new(pool[..n].to_vec());
            let words = seq.encode();
            let parsed: PowerSequence = PowerSequence::parse(&words).unwrap();
            assert_eq!(parsed.len(), n);
            assert_eq!(parsed, seq);
        }
    }

    /// A second action family sharing the framing rules.
    #[derive(Debug, PartialEq)]
    enum ResetAction {
        Pulse(u32),
    }

    impl ActionSet for ResetAction {
        fn decode(start: usize, type_word: u32, payload: &[u32]) -> Result<Self, SequenceError> {
            match (type_word, payload) {
                (0xff22_0000, [line]) => Ok(ResetAction::Pulse(*line)),
                (word, _) => Err(SequenceError::UnknownType { start, word }),
            }
        }

        fn encode(&self, out: &mut Vec<u32>) {
            let ResetAction::Pulse(line) = self;
            out.extend_from_slice(&[0xff22_0000, *line]);
        }
    }

    #[test]
    fn test_custom_action_set() {
        let seq = PowerSequence::new(vec![ResetAction::Pulse(4), ResetAction::Pulse(9)]);
        let parsed = PowerSequence::<ResetAction>::parse(&seq.encode()).unwrap();
        assert_eq!(parsed.actions(), seq.actions());
    }

    #[test]
    fn test_run_order_and_regulator_transitions() {
        let board = SimBoard::new();
        board.set_regulator("vcam", true, true);
        let regulators = vec![
            Regulator {
                name: "vcam".into(),
                microvolts: Some(2_800_000),
            },
            Regulator {
                name: "vio".into(),
                microvolts: None,
            },
        ];
        let seq = PowerSequence::new(vec![
            gpio(5, &[(1, 0), (0, 0)]),
            PowerAction::Pmic {
                enable: true,
                delay_ms: 0,
            },
            PowerAction::Clock {
                enable: true,
                delay_ms: 0,
            },
        ]);
        seq.run(&board, &regulators).unwrap();

        assert_eq!(
            board.power_events(),
            vec![
                PowerEvent::Gpio(5, 1),
                PowerEvent::Gpio(5, 0),
                PowerEvent::Voltage("vcam".into(), 2_800_000),
                // vcam was already on, only vio transitions
                PowerEvent::Regulator("vio".into(), true),
                PowerEvent::Clock(true),
            ]
        );
    }

    #[test]
    fn test_sensor_power_is_idempotent() {
        let board = Arc::new(SimBoard::new());
        let config = PowerConfig {
            enable_seq: PowerSequence::new(vec![gpio(1, &[(1, 0)])]).encode(),
            disable_seq: PowerSequence::new(vec![gpio(1, &[(0, 0)])]).encode(),
            regulators: Vec::new(),
            on_demand: false,
        };
        let power = SensorPower::from_config(&config, board.clone()).unwrap();

        assert!(power.set(true).unwrap());
        assert!(!power.set(true).unwrap());
        assert!(power.is_enabled());
        assert!(power.set(false).unwrap());
        assert!(!power.set(false).unwrap());
        assert_eq!(
            board.power_events(),
            vec![PowerEvent::Gpio(1, 1), PowerEvent::Gpio(1, 0)]
        );
    }

    #[test]
    fn test_init_table_stops_at_terminator() {
        let board = SimBoard::new();
        let table = [[0x02, 0x40], [0x03, 0x33], INIT_TABLE_END, [0x04, 0x00]];
        assert_eq!(write_init_table(&board, &table).unwrap(), 2);
        assert_eq!(board.sensor_writes(), vec![(0x02, 0x40), (0x03, 0x33)]);
    }
}
