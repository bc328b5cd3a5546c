//! NeXus unit categories and a small unit-expression parser.
//!
//! Only dimensionality matters here: the converter never rescales values, it only
//! checks that a `units` string is dimensionally compatible with the category the
//! schema declares. Angles are kept as their own base dimension so that, for
//! example, `degrees` is not accepted where `NX_DIMENSIONLESS` is declared.
use std::fmt;
use std::str::FromStr;

use super::error::UnitError;

const BASE_NAMES: [&str; 8] = [
    "length",
    "mass",
    "time",
    "current",
    "temperature",
    "substance",
    "luminosity",
    "angle",
];

/// Exponents of the base dimensions, in the order of `BASE_NAMES`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Dimensionality([i8; 8]);

impl Dimensionality {
    pub const DIMENSIONLESS: Self = Self([0; 8]);

    const fn new(l: i8, m: i8, t: i8, i: i8, th: i8, n: i8, j: i8, a: i8) -> Self {
        Self([l, m, t, i, th, n, j, a])
    }

    pub fn is_dimensionless(&self) -> bool {
        *self == Self::DIMENSIONLESS
    }

    fn mul(self, other: Self) -> Self {
        let mut out = self.0;
        for (o, e) in out.iter_mut().zip(other.0.iter()) {
            *o += e;
        }
        Self(out)
    }

    fn pow(self, exponent: i8) -> Self {
        let mut out = self.0;
        for o in out.iter_mut() {
            *o *= exponent;
        }
        Self(out)
    }

    /// `mul` for parsed expressions; None when an exponent leaves the i8 range
    fn checked_mul(self, other: Self) -> Option<Self> {
        let mut out = self.0;
        for (o, e) in out.iter_mut().zip(other.0.iter()) {
            *o = o.checked_add(*e)?;
        }
        Some(Self(out))
    }

    fn checked_pow(self, exponent: i8) -> Option<Self> {
        let mut out = self.0;
        for o in out.iter_mut() {
            *o = o.checked_mul(exponent)?;
        }
        Some(Self(out))
    }
}

impl fmt::Display for Dimensionality {
    /// Formats like `[mass] * [length] ** 2 / [time] ** 2`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }
        let term = |name: &str, exp: i8| {
            if exp == 1 {
                format!("[{name}]")
            } else {
                format!("[{name}] ** {exp}")
            }
        };
        let numerator: Vec<String> = BASE_NAMES
            .iter()
            .zip(self.0.iter())
            .filter(|(_, e)| **e > 0)
            .map(|(n, e)| term(n, *e))
            .collect();
        let denominator: Vec<String> = BASE_NAMES
            .iter()
            .zip(self.0.iter())
            .filter(|(_, e)| **e < 0)
            .map(|(n, e)| term(n, -*e))
            .collect();
        match (numerator.is_empty(), denominator.is_empty()) {
            (false, true) => write!(f, "{}", numerator.join(" * ")),
            (true, false) => write!(f, "1 / {}", denominator.join(" / ")),
            _ => write!(f, "{} / {}", numerator.join(" * "), denominator.join(" / ")),
        }
    }
}

const LENGTH: Dimensionality = Dimensionality::new(1, 0, 0, 0, 0, 0, 0, 0);
const MASS: Dimensionality = Dimensionality::new(0, 1, 0, 0, 0, 0, 0, 0);
const TIME: Dimensionality = Dimensionality::new(0, 0, 1, 0, 0, 0, 0, 0);
const CURRENT: Dimensionality = Dimensionality::new(0, 0, 0, 1, 0, 0, 0, 0);
const TEMPERATURE: Dimensionality = Dimensionality::new(0, 0, 0, 0, 1, 0, 0, 0);
const SUBSTANCE: Dimensionality = Dimensionality::new(0, 0, 0, 0, 0, 1, 0, 0);
const LUMINOSITY: Dimensionality = Dimensionality::new(0, 0, 0, 0, 0, 0, 1, 0);
const ANGLE: Dimensionality = Dimensionality::new(0, 0, 0, 0, 0, 0, 0, 1);
const SOLID_ANGLE: Dimensionality = Dimensionality::new(0, 0, 0, 0, 0, 0, 0, 2);
const AREA: Dimensionality = Dimensionality::new(2, 0, 0, 0, 0, 0, 0, 0);
const VOLUME: Dimensionality = Dimensionality::new(3, 0, 0, 0, 0, 0, 0, 0);
const FREQUENCY: Dimensionality = Dimensionality::new(0, 0, -1, 0, 0, 0, 0, 0);
const FORCE: Dimensionality = Dimensionality::new(1, 1, -2, 0, 0, 0, 0, 0);
const PRESSURE: Dimensionality = Dimensionality::new(-1, 1, -2, 0, 0, 0, 0, 0);
const ENERGY: Dimensionality = Dimensionality::new(2, 1, -2, 0, 0, 0, 0, 0);
const POWER: Dimensionality = Dimensionality::new(2, 1, -3, 0, 0, 0, 0, 0);
const CHARGE: Dimensionality = Dimensionality::new(0, 0, 1, 1, 0, 0, 0, 0);
const VOLTAGE: Dimensionality = Dimensionality::new(2, 1, -3, -1, 0, 0, 0, 0);
const RESISTANCE: Dimensionality = Dimensionality::new(2, 1, -3, -2, 0, 0, 0, 0);
const CONDUCTANCE: Dimensionality = Dimensionality::new(-2, -1, 3, 2, 0, 0, 0, 0);
const CAPACITANCE: Dimensionality = Dimensionality::new(-2, -1, 4, 2, 0, 0, 0, 0);
const MAGNETIC_FLUX: Dimensionality = Dimensionality::new(2, 1, -2, -1, 0, 0, 0, 0);
const MAGNETIC_FIELD: Dimensionality = Dimensionality::new(0, 1, -2, -1, 0, 0, 0, 0);
const INDUCTANCE: Dimensionality = Dimensionality::new(2, 1, -2, -2, 0, 0, 0, 0);
const ELECTRIC_FIELD: Dimensionality = Dimensionality::new(1, 1, -3, -1, 0, 0, 0, 0);

/// A unit category token as declared by the `units` attribute of an NXDL field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitCategory {
    Angle,
    Any,
    Area,
    Charge,
    Count,
    CrossSection,
    Current,
    Dimensionless,
    ElectricField,
    Emittance,
    Energy,
    Flux,
    Frequency,
    Length,
    MagneticField,
    Mass,
    MassDensity,
    MolecularWeight,
    Period,
    PerArea,
    PerLength,
    Power,
    Pressure,
    Pulses,
    ScatteringLengthDensity,
    SolidAngle,
    Temperature,
    Time,
    TimeOfFlight,
    Transformation,
    Unitless,
    Voltage,
    Volume,
    Wavelength,
    Wavenumber,
}

const CATEGORY_TOKENS: [(&str, UnitCategory); 35] = [
    ("NX_ANGLE", UnitCategory::Angle),
    ("NX_ANY", UnitCategory::Any),
    ("NX_AREA", UnitCategory::Area),
    ("NX_CHARGE", UnitCategory::Charge),
    ("NX_COUNT", UnitCategory::Count),
    ("NX_CROSS_SECTION", UnitCategory::CrossSection),
    ("NX_CURRENT", UnitCategory::Current),
    ("NX_DIMENSIONLESS", UnitCategory::Dimensionless),
    ("NX_ELECTRIC_FIELD", UnitCategory::ElectricField),
    ("NX_EMITTANCE", UnitCategory::Emittance),
    ("NX_ENERGY", UnitCategory::Energy),
    ("NX_FLUX", UnitCategory::Flux),
    ("NX_FREQUENCY", UnitCategory::Frequency),
    ("NX_LENGTH", UnitCategory::Length),
    ("NX_MAGNETIC_FIELD", UnitCategory::MagneticField),
    ("NX_MASS", UnitCategory::Mass),
    ("NX_MASS_DENSITY", UnitCategory::MassDensity),
    ("NX_MOLECULAR_WEIGHT", UnitCategory::MolecularWeight),
    ("NX_PERIOD", UnitCategory::Period),
    ("NX_PER_AREA", UnitCategory::PerArea),
    ("NX_PER_LENGTH", UnitCategory::PerLength),
    ("NX_POWER", UnitCategory::Power),
    ("NX_PRESSURE", UnitCategory::Pressure),
    ("NX_PULSES", UnitCategory::Pulses),
    (
        "NX_SCATTERING_LENGTH_DENSITY",
        UnitCategory::ScatteringLengthDensity,
    ),
    ("NX_SOLID_ANGLE", UnitCategory::SolidAngle),
    ("NX_TEMPERATURE", UnitCategory::Temperature),
    ("NX_TIME", UnitCategory::Time),
    ("NX_TIME_OF_FLIGHT", UnitCategory::TimeOfFlight),
    ("NX_TRANSFORMATION", UnitCategory::Transformation),
    ("NX_UNITLESS", UnitCategory::Unitless),
    ("NX_VOLTAGE", UnitCategory::Voltage),
    ("NX_VOLUME", UnitCategory::Volume),
    ("NX_WAVELENGTH", UnitCategory::Wavelength),
    ("NX_WAVENUMBER", UnitCategory::Wavenumber),
];

impl UnitCategory {
    pub fn token(&self) -> &'static str {
        CATEGORY_TOKENS
            .iter()
            .find(|(_, c)| c == self)
            .map(|(t, _)| *t)
            .unwrap_or("NX_ANY")
    }

    /// The canonical dimensionality of the category.
    ///
    /// `None` for categories that do not constrain dimensionality (`NX_ANY`,
    /// `NX_TRANSFORMATION`) and for `NX_UNITLESS`, which forbids units entirely.
    pub fn dimensionality(&self) -> Option<Dimensionality> {
        use UnitCategory::*;
        let dims = match self {
            Any | Transformation | Unitless => return None,
            Angle => ANGLE,
            Area | CrossSection => AREA,
            Charge => CHARGE,
            Count | Dimensionless | Pulses => Dimensionality::DIMENSIONLESS,
            Current => CURRENT,
            ElectricField => ELECTRIC_FIELD,
            Emittance => LENGTH.mul(ANGLE),
            Energy => ENERGY,
            Flux => FREQUENCY.mul(AREA.pow(-1)),
            Frequency => FREQUENCY,
            Length | Wavelength => LENGTH,
            MagneticField => MAGNETIC_FIELD,
            Mass => MASS,
            MassDensity => MASS.mul(VOLUME.pow(-1)),
            MolecularWeight => MASS.mul(SUBSTANCE.pow(-1)),
            Period | Time | TimeOfFlight => TIME,
            PerArea | ScatteringLengthDensity => AREA.pow(-1),
            PerLength | Wavenumber => LENGTH.pow(-1),
            Power => POWER,
            Pressure => PRESSURE,
            SolidAngle => SOLID_ANGLE,
            Temperature => TEMPERATURE,
            Voltage => VOLTAGE,
            Volume => VOLUME,
        };
        Some(dims)
    }
}

impl FromStr for UnitCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CATEGORY_TOKENS
            .iter()
            .find(|(t, _)| *t == s)
            .map(|(_, c)| *c)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for UnitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// (names, dimensionality, accepts SI prefixes)
const SYMBOLS: &[(&[&str], Dimensionality, bool)] = &[
    (&["m"], LENGTH, true),
    (&["g"], MASS, true),
    (&["s"], TIME, true),
    (&["A"], CURRENT, true),
    (&["K"], TEMPERATURE, true),
    (&["mol"], SUBSTANCE, true),
    (&["cd"], LUMINOSITY, true),
    (&["rad"], ANGLE, true),
    (&["sr"], SOLID_ANGLE, false),
    (&["deg", "°"], ANGLE, false),
    (&["Hz"], FREQUENCY, true),
    (&["N"], FORCE, true),
    (&["Pa"], PRESSURE, true),
    (&["J"], ENERGY, true),
    (&["W"], POWER, true),
    (&["C"], CHARGE, true),
    (&["V"], VOLTAGE, true),
    (&["Ω", "ohm"], RESISTANCE, true),
    (&["S"], CONDUCTANCE, true),
    (&["F"], CAPACITANCE, true),
    (&["Wb"], MAGNETIC_FLUX, true),
    (&["T"], MAGNETIC_FIELD, true),
    (&["H"], INDUCTANCE, true),
    (&["eV"], ENERGY, true),
    (&["Å", "Ang", "angstrom"], LENGTH, false),
    (&["L", "l"], VOLUME, true),
    (&["bar"], PRESSURE, true),
    (&["Torr", "torr"], PRESSURE, true),
    (&["atm"], PRESSURE, false),
    (&["min"], TIME, false),
    (&["h"], TIME, false),
    (&["d"], TIME, false),
    (&["Da", "u"], MASS, true),
    (&["b"], AREA, true),
    (&["degC", "°C"], TEMPERATURE, false),
    (&["counts", "count", "cts"], Dimensionality::DIMENSIONLESS, false),
    (&["%", "percent", "ppm"], Dimensionality::DIMENSIONLESS, false),
];

const NAMES: &[(&[&str], Dimensionality)] = &[
    (&["meter", "metre"], LENGTH),
    (&["gram"], MASS),
    (&["second"], TIME),
    (&["ampere", "amp"], CURRENT),
    (&["kelvin"], TEMPERATURE),
    (&["mole"], SUBSTANCE),
    (&["candela"], LUMINOSITY),
    (&["radian"], ANGLE),
    (&["degree"], ANGLE),
    (&["steradian"], SOLID_ANGLE),
    (&["hertz"], FREQUENCY),
    (&["newton"], FORCE),
    (&["pascal"], PRESSURE),
    (&["joule"], ENERGY),
    (&["watt"], POWER),
    (&["coulomb"], CHARGE),
    (&["volt"], VOLTAGE),
    (&["siemens"], CONDUCTANCE),
    (&["farad"], CAPACITANCE),
    (&["weber"], MAGNETIC_FLUX),
    (&["tesla"], MAGNETIC_FIELD),
    (&["henry"], INDUCTANCE),
    (&["electronvolt", "electron_volt"], ENERGY),
    (&["liter", "litre"], VOLUME),
    (&["atmosphere"], PRESSURE),
    (&["minute"], TIME),
    (&["hour"], TIME),
    (&["day"], TIME),
    (&["dalton"], MASS),
    (&["barn"], AREA),
    (&["celsius", "degree_Celsius"], TEMPERATURE),
];

const SYMBOL_PREFIXES: [&str; 22] = [
    "da", "Y", "Z", "E", "P", "T", "G", "M", "k", "h", "d", "c", "m", "u", "µ", "μ", "n", "p",
    "f", "a", "z", "y",
];

const NAME_PREFIXES: [&str; 20] = [
    "yotta", "zetta", "exa", "peta", "tera", "giga", "mega", "kilo", "hecto", "deka", "deca",
    "deci", "centi", "milli", "micro", "nano", "pico", "femto", "atto", "zepto",
];

fn lookup_symbol(symbol: &str) -> Option<(Dimensionality, bool)> {
    SYMBOLS
        .iter()
        .find(|(names, _, _)| names.contains(&symbol))
        .map(|(_, dims, prefixable)| (*dims, *prefixable))
}

fn lookup_name(name: &str) -> Option<Dimensionality> {
    let lookup = |n: &str| {
        NAMES
            .iter()
            .find(|(names, _)| names.contains(&n))
            .map(|(_, dims)| *dims)
    };
    lookup(name).or_else(|| name.strip_suffix('s').and_then(lookup))
}

/// Resolve a single unit identifier, e.g. `keV`, `millimeter`, `degrees`
fn lookup_unit(ident: &str) -> Option<Dimensionality> {
    if let Some((dims, _)) = lookup_symbol(ident) {
        return Some(dims);
    }
    if let Some(dims) = lookup_name(ident) {
        return Some(dims);
    }
    for prefix in SYMBOL_PREFIXES {
        if let Some(rest) = ident.strip_prefix(prefix) {
            if let Some((dims, true)) = lookup_symbol(rest) {
                return Some(dims);
            }
        }
    }
    for prefix in NAME_PREFIXES {
        if let Some(rest) = ident.strip_prefix(prefix) {
            if let Some(dims) = lookup_name(rest) {
                return Some(dims);
            }
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Mul,
    Div,
    Pow,
    Open,
    Close,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '°' || c == '%' || c == 'Ω' || c == 'µ'
}

fn tokenize(expr: &str) -> Result<Vec<Token>, UnitError> {
    let malformed = || UnitError::Malformed(expr.to_string());
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '*' | '·' | '.' => {
                tokens.push(Token::Mul);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Div);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(text.parse().map_err(|_| malformed())?));
            }
            c if is_ident_char(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(malformed()),
        }
    }
    Ok(tokens)
}

/// Recursive descent over `expr := term ((*|/|juxtaposition) term)*`,
/// `term := factor ((^|**) number)?`, `factor := ident | number | ( expr )`
struct UnitParser<'a> {
    tokens: &'a [Token],
    position: usize,
    source: &'a str,
}

impl<'a> UnitParser<'a> {
    fn malformed(&self) -> UnitError {
        UnitError::Malformed(self.source.to_string())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn expression(&mut self) -> Result<Dimensionality, UnitError> {
        let mut dims = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Mul) => {
                    self.position += 1;
                    let rhs = self.term()?;
                    dims = dims.checked_mul(rhs).ok_or_else(|| self.malformed())?;
                }
                Some(Token::Div) => {
                    self.position += 1;
                    let rhs = self.term()?;
                    dims = rhs
                        .checked_pow(-1)
                        .and_then(|inverse| dims.checked_mul(inverse))
                        .ok_or_else(|| self.malformed())?;
                }
                Some(Token::Ident(_)) | Some(Token::Open) | Some(Token::Number(_)) => {
                    let rhs = self.term()?;
                    dims = dims.checked_mul(rhs).ok_or_else(|| self.malformed())?;
                }
                _ => return Ok(dims),
            }
        }
    }

    fn term(&mut self) -> Result<Dimensionality, UnitError> {
        let base = self.factor()?;
        if self.peek() == Some(&Token::Pow) {
            self.position += 1;
            let exponent = match self.next() {
                Some(Token::Number(n)) if n.fract() == 0.0 && n.abs() <= i8::MAX as f64 => n as i8,
                _ => return Err(self.malformed()),
            };
            return base.checked_pow(exponent).ok_or_else(|| self.malformed());
        }
        Ok(base)
    }

    fn factor(&mut self) -> Result<Dimensionality, UnitError> {
        match self.next() {
            Some(Token::Ident(ident)) => {
                lookup_unit(&ident).ok_or(UnitError::UnknownUnit(ident))
            }
            Some(Token::Number(_)) => Ok(Dimensionality::DIMENSIONLESS),
            Some(Token::Open) => {
                let dims = self.expression()?;
                match self.next() {
                    Some(Token::Close) => Ok(dims),
                    _ => Err(self.malformed()),
                }
            }
            _ => Err(self.malformed()),
        }
    }
}

/// Parse a unit expression such as `kg*m^2/s**2` into its dimensionality.
/// The empty string is dimensionless.
pub fn parse_unit(expr: &str) -> Result<Dimensionality, UnitError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Ok(Dimensionality::DIMENSIONLESS);
    }
    let tokens = tokenize(trimmed)?;
    let mut parser = UnitParser {
        tokens: &tokens,
        position: 0,
        source: trimmed,
    };
    let dims = parser.expression()?;
    if parser.position != tokens.len() {
        return Err(parser.malformed());
    }
    Ok(dims)
}

/// True when `units` is acceptable for a field of the given category
pub fn matches(category: UnitCategory, units: &str) -> bool {
    match category {
        UnitCategory::Any | UnitCategory::Transformation => true,
        UnitCategory::Unitless => units.trim().is_empty(),
        other => match (other.dimensionality(), parse_unit(units)) {
            (Some(expected), Ok(actual)) => expected == actual,
            _ => false,
        },
    }
}
