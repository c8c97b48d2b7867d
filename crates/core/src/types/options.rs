//! Line parameters used to open a serial device

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Default read buffer size (8 KiB)
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Largest read buffer a device may be asked for (16 MiB)
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl DataBits {
    pub fn value(self) -> u8 {
        match self {
            Self::Five => 5,
            Self::Six => 6,
            Self::Seven => 7,
            Self::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = CoreError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(CoreError::InvalidOptions(format!(
                "data bits must be 5, 6, 7 or 8 (got {})",
                other
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        bits.value()
    }
}

/// Number of stop bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl StopBits {
    pub fn value(self) -> u8 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = CoreError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(CoreError::InvalidOptions(format!(
                "stop bits must be 1 or 2 (got {})",
                other
            ))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        bits.value()
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl FromStr for Parity {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "even" | "e" => Ok(Self::Even),
            "odd" | "o" => Ok(Self::Odd),
            other => Err(CoreError::InvalidOptions(format!("unknown parity '{}'", other))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Even => "even",
            Self::Odd => "odd",
        })
    }
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    /// RTS/CTS
    Hardware,
}

impl FromStr for FlowControl {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "hardware" | "rtscts" => Ok(Self::Hardware),
            other => Err(CoreError::InvalidOptions(format!(
                "unknown flow control '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for FlowControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Hardware => "hardware",
        })
    }
}

/// Options for one connection attempt
///
/// Built fresh from the current UI state every time a port is opened and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Size of the buffer used for each read
    pub buffer_size: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl OpenOptions {
    /// Create with a custom baud rate and defaults for everything else
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Default::default()
        }
    }

    pub fn data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Reject options no device would accept.
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(CoreError::InvalidOptions("baud rate must be positive".into()));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return Err(CoreError::InvalidOptions(format!(
                "buffer size must be between 1 and {} bytes (got {})",
                MAX_BUFFER_SIZE, self.buffer_size
            )));
        }
        Ok(())
    }
}

impl fmt::Display for OpenOptions {
    /// Conventional `9600 8N1` notation, with `+rtscts` for hardware flow control
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits.value(),
            parity,
            self.stop_bits.value()
        )?;
        if self.flow_control == FlowControl::Hardware {
            f.write_str(" +rtscts")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = OpenOptions::default();
        assert_eq!(opts.baud_rate, 9600);
        assert_eq!(opts.data_bits, DataBits::Eight);
        assert_eq!(opts.parity, Parity::None);
        assert_eq!(opts.stop_bits, StopBits::One);
        assert_eq!(opts.flow_control, FlowControl::None);
        assert_eq!(opts.buffer_size, 8192);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_builder_and_display() {
        let opts = OpenOptions::with_baud_rate(115200)
            .data_bits(DataBits::Seven)
            .parity(Parity::Even)
            .stop_bits(StopBits::Two)
            .flow_control(FlowControl::Hardware);
        assert_eq!(opts.to_string(), "115200 7E2 +rtscts");
    }

    #[test]
    fn test_custom_baud_rate_accepted() {
        assert!(OpenOptions::with_baud_rate(250_000).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero() {
        assert!(OpenOptions::with_baud_rate(0).validate().is_err());
        assert!(OpenOptions::default().buffer_size(0).validate().is_err());
        assert!(OpenOptions::default()
            .buffer_size(MAX_BUFFER_SIZE + 1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_parse_parity_and_flow_control() {
        assert_eq!("EVEN".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("o".parse::<Parity>().unwrap(), Parity::Odd);
        assert!("mark".parse::<Parity>().is_err());
        assert_eq!("rtscts".parse::<FlowControl>().unwrap(), FlowControl::Hardware);
        assert!("xonxoff".parse::<FlowControl>().is_err());
    }

    #[test]
    fn test_bits_conversion() {
        assert_eq!(DataBits::try_from(7).unwrap(), DataBits::Seven);
        assert!(DataBits::try_from(9).is_err());
        assert_eq!(StopBits::try_from(2).unwrap(), StopBits::Two);
        assert!(StopBits::try_from(3).is_err());
    }
}
