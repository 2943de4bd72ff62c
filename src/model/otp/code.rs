use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;

use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const LENGTH: usize = 6;

/// A one-time code: six decimal digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code {
    digits: [u8; LENGTH],
}

impl Code {
    /// Generate a random code.
    pub fn random() -> Self {
        let mut digits = [0; LENGTH];
        let digit_dist = Uniform::from(0..=9);
        let mut rng = rand::thread_rng();
        for digit in &mut digits {
            *digit = digit_dist.sample(&mut rng);
        }
        Self { digits }
    }

    /// Compare against a submitted code in time independent of where the
    /// digits differ.
    pub fn matches(&self, submitted: &Code) -> bool {
        self.digits
            .iter()
            .zip(submitted.digits.iter())
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
    }

    /// A different, valid code. Handy for exercising the failure path.
    pub fn wrong(&self) -> Self {
        let mut digits = self.digits;
        digits[0] = (digits[0] + 1) % 10;
        Self { digits }
    }
}

impl Deref for Code {
    type Target = [u8; LENGTH];

    fn deref(&self) -> &Self::Target {
        &self.digits
    }
}

impl Display for Code {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for digit in self.digits {
            write!(formatter, "{digit}")?;
        }
        Ok(())
    }
}

impl FromStr for Code {
    type Err = ParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let len = string.chars().count();
        if len != LENGTH {
            return Err(Self::Err::InvalidLength(len));
        }
        let mut digits = [0; LENGTH];
        for (digit, c) in digits.iter_mut().zip(string.chars()) {
            *digit = c.to_digit(10).ok_or(Self::Err::InvalidChar(c))? as u8;
        }
        Ok(Self { digits })
    }
}

impl TryFrom<String> for Code {
    type Error = ParseError;

    fn try_from(string: String) -> Result<Self, Self::Error> {
        string.parse()
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.to_string()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("code must contain exactly 6 characters, found {0}")]
    InvalidLength(usize),
    #[error("code must contain only digits, found '{0}'")]
    InvalidChar(char),
}
