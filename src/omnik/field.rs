use std::fmt;
use std::str::FromStr;

use crate::error::Error;

// Channel {{{
/// One of the (up to three) DC input or AC output lines of the inverter.
///
/// Construction never fails: anything outside 1..=3 is treated as channel 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel(u8);

impl Channel {
    pub fn new(index: u32) -> Self {
        match index {
            1..=3 => Self(index as u8),
            _ => Self(1),
        }
    }

    pub fn index(&self) -> u8 {
        self.0
    }

    // zero-based, used for offset arithmetic
    fn position(&self) -> usize {
        (self.0 - 1) as usize
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self(1)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
} // }}}

// FieldSpec {{{
/// How a field is laid out in the response frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Layout {
    /// UTF-8 text in `offset..end`
    Text { end: usize },
    /// big-endian u16 divided by `divider`, 0xFFFF is the no-signal sentinel
    U16 { divider: u32 },
    /// big-endian u32 divided by `divider`
    U32 { divider: u32 },
}

/// Applied to the scaled value after it has been read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PostFilter {
    None,
    /// truncate to an integer (watts, hours)
    Integer,
    /// values above the limit mean the inverter is powered down
    Ceiling(f64),
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSpec {
    pub offset: usize,
    pub layout: Layout,
    pub post: PostFilter,
}

impl FieldSpec {
    const fn u16(offset: usize, divider: u32, post: PostFilter) -> Self {
        Self {
            offset,
            layout: Layout::U16 { divider },
            post,
        }
    }

    const fn u32(offset: usize, divider: u32, post: PostFilter) -> Self {
        Self {
            offset,
            layout: Layout::U32 { divider },
            post,
        }
    }
}

pub const TEMPERATURE_CEILING: f64 = 150.0;

pub const INVERTER_SN: FieldSpec = FieldSpec {
    offset: 15,
    layout: Layout::Text { end: 31 },
    post: PostFilter::None,
};
pub const TEMPERATURE: FieldSpec = FieldSpec::u16(31, 10, PostFilter::Ceiling(TEMPERATURE_CEILING));
pub const ACTUAL_POWER: FieldSpec = FieldSpec::u16(59, 1, PostFilter::Integer);
pub const ENERGY_TODAY: FieldSpec = FieldSpec::u16(69, 100, PostFilter::None);
pub const ENERGY_TOTAL: FieldSpec = FieldSpec::u32(71, 10, PostFilter::None);
pub const HOURS_TOTAL: FieldSpec = FieldSpec::u32(75, 1, PostFilter::Integer);
// }}}

// FieldFamily {{{
/// A measurement that exists once per channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldFamily {
    DcInputVoltage,
    DcInputCurrent,
    AcOutputVoltage,
    AcOutputCurrent,
    AcOutputFrequency,
    AcOutputPower,
}

impl FieldFamily {
    pub const ALL: [FieldFamily; 6] = [
        Self::DcInputVoltage,
        Self::DcInputCurrent,
        Self::AcOutputVoltage,
        Self::AcOutputCurrent,
        Self::AcOutputFrequency,
        Self::AcOutputPower,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DcInputVoltage => "dcinputvoltage",
            Self::DcInputCurrent => "dcinputcurrent",
            Self::AcOutputVoltage => "acoutputvoltage",
            Self::AcOutputCurrent => "acoutputcurrent",
            Self::AcOutputFrequency => "acoutputfrequency",
            Self::AcOutputPower => "acoutputpower",
        }
    }

    // (base offset, stride between channels, divider, post filter)
    fn layout(&self) -> (usize, usize, u32, PostFilter) {
        match self {
            Self::DcInputVoltage => (33, 2, 10, PostFilter::None),
            Self::DcInputCurrent => (39, 2, 10, PostFilter::None),
            Self::AcOutputCurrent => (45, 2, 10, PostFilter::None),
            Self::AcOutputVoltage => (51, 2, 10, PostFilter::None),
            Self::AcOutputFrequency => (57, 4, 100, PostFilter::None),
            Self::AcOutputPower => (59, 4, 1, PostFilter::Integer),
        }
    }
}

/// Resolves a channel field to its location in the response frame.
///
/// Channels outside 1..=3 resolve as channel 1.
pub fn resolve(family: FieldFamily, channel: u32) -> FieldSpec {
    spec_for(family, Channel::new(channel))
}

fn spec_for(family: FieldFamily, channel: Channel) -> FieldSpec {
    let (base, stride, divider, post) = family.layout();
    FieldSpec::u16(base + channel.position() * stride, divider, post)
} // }}}

// Field {{{
/// Everything the bridge knows how to report, from either source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Status,
    ActualPower,
    EnergyToday,
    EnergyTotal,
    HoursTotal,
    InverterSn,
    Temperature,
    Channel(FieldFamily, Channel),
    IncomeToday,
    IncomeTotal,
}

impl Field {
    /// Where this field lives in an inverter response, if it lives there at all.
    ///
    /// `Status` is derived and the income fields only exist on the portal.
    pub fn spec(&self) -> Option<FieldSpec> {
        match self {
            Self::ActualPower => Some(ACTUAL_POWER),
            Self::EnergyToday => Some(ENERGY_TODAY),
            Self::EnergyTotal => Some(ENERGY_TOTAL),
            Self::HoursTotal => Some(HOURS_TOTAL),
            Self::InverterSn => Some(INVERTER_SN),
            Self::Temperature => Some(TEMPERATURE),
            Self::Channel(family, channel) => Some(spec_for(*family, *channel)),
            Self::Status | Self::IncomeToday | Self::IncomeTotal => None,
        }
    }

    pub fn is_income(&self) -> bool {
        matches!(self, Self::IncomeToday | Self::IncomeTotal)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => write!(f, "status"),
            Self::ActualPower => write!(f, "actualpower"),
            Self::EnergyToday => write!(f, "energytoday"),
            Self::EnergyTotal => write!(f, "energytotal"),
            Self::HoursTotal => write!(f, "hourstotal"),
            Self::InverterSn => write!(f, "invertersn"),
            Self::Temperature => write!(f, "temperature"),
            Self::Channel(family, channel) => write!(f, "{}{}", family.as_str(), channel),
            Self::IncomeToday => write!(f, "incometoday"),
            Self::IncomeTotal => write!(f, "incometotal"),
        }
    }
}

impl FromStr for Field {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name: String = s.trim().to_ascii_lowercase().replace('-', "");

        let field = match name.as_str() {
            "status" => Self::Status,
            "actualpower" => Self::ActualPower,
            "energytoday" => Self::EnergyToday,
            "energytotal" => Self::EnergyTotal,
            "hourstotal" => Self::HoursTotal,
            "invertersn" => Self::InverterSn,
            "temperature" => Self::Temperature,
            "incometoday" => Self::IncomeToday,
            "incometotal" => Self::IncomeTotal,
            _ => {
                let (family, suffix) = FieldFamily::ALL
                    .iter()
                    .find_map(|f| name.strip_prefix(f.as_str()).map(|rest| (*f, rest)))
                    .ok_or_else(|| Error::UnknownSensor(s.to_owned()))?;

                let channel = if suffix.is_empty() {
                    Channel::default()
                } else if suffix.bytes().all(|b| b.is_ascii_digit()) {
                    // too many digits to fit is just another out-of-range channel
                    Channel::new(suffix.parse().unwrap_or(0))
                } else {
                    return Err(Error::UnknownSensor(s.to_owned()));
                };

                Self::Channel(family, channel)
            }
        };

        Ok(field)
    }
} // }}}

// Sensor {{{
/// A configured sensor: the name the user asked for and the field behind it.
///
/// Names are resolved once when the configuration is loaded; polling only ever
/// sees the resolved `Field`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sensor {
    pub name: String,
    pub field: Field,
}

impl FromStr for Sensor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            name: s.to_owned(),
            field: s.parse()?,
        })
    }
} // }}}
