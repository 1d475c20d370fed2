use {
    super::error::PipelineError,
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Non-negative amount in the currency's minor unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MoneyAmount(i64);

impl MoneyAmount {
    pub fn new(minor: i64) -> Result<Self, PipelineError> {
        if minor < 0 {
            return Err(PipelineError::Validation(format!(
                "MoneyAmount cannot be negative, got: {minor}"
            )));
        }
        Ok(Self(minor))
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    /// Converts a gateway decimal (`49.90`) into minor units for `currency`.
    pub fn from_decimal(value: f64, currency: &Currency) -> Result<Self, PipelineError> {
        if !value.is_finite() {
            return Err(PipelineError::Validation(format!(
                "amount is not a finite number: {value}"
            )));
        }
        let scale = 10f64.powi(currency.minor_unit_exponent());
        let minor = (value * scale).round();
        if minor > i64::MAX as f64 {
            return Err(PipelineError::Validation("amount exceeds storage capacity".into()));
        }
        Self::new(minor as i64)
    }

    pub fn to_decimal(&self, currency: &Currency) -> f64 {
        self.0 as f64 / 10f64.powi(currency.minor_unit_exponent())
    }

    /// Applies a percentage discount, rounding the discount half-up.
    pub fn discounted(self, percent: u8) -> Result<MoneyAmount, PipelineError> {
        if percent > 100 {
            return Err(PipelineError::Validation(format!(
                "discount percentage must be 0..=100, got: {percent}"
            )));
        }
        let off = (self.0 as i128 * i128::from(percent) + 50) / 100;
        Ok(MoneyAmount(self.0 - off as i64))
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ars,
    Brl,
    Clp,
    Mxn,
    Usd,
    Eur,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ars => "ARS",
            Self::Brl => "BRL",
            Self::Clp => "CLP",
            Self::Mxn => "MXN",
            Self::Usd => "USD",
            Self::Eur => "EUR",
        }
    }

    pub fn minor_unit_exponent(&self) -> i32 {
        match self {
            Self::Clp => 0,
            _ => 2,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Currency {
    type Error = PipelineError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_ascii_uppercase().as_str() {
            "ARS" => Ok(Self::Ars),
            "BRL" => Ok(Self::Brl),
            "CLP" => Ok(Self::Clp),
            "MXN" => Ok(Self::Mxn),
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            other => Err(PipelineError::Validation(format!(
                "unknown currency: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: MoneyAmount,
    currency: Currency,
}

impl Money {
    pub fn new(amount: MoneyAmount, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
