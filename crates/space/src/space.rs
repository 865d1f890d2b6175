//! Mixed-radix packing of independent discrete sub-parameters.
//!
//! Several small choices (tile depth, unroll factor, loop order, ...) are
//! folded into one integer, the "extra parameter". The first registered
//! sub-parameter is the least significant digit.

use anyhow::{anyhow, ensure, Result};
use serde::Serialize;

/// One registered sub-parameter and the number of values it can take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubParameter {
    pub name: String,
    pub radix: usize,
}

/// Ordered list of sub-parameters sharing one packed index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParameterSpace {
    params: Vec<SubParameter>,
    total_variations: usize,
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            total_variations: 1,
        }
    }

    /// Register a sub-parameter and return its digit position.
    pub fn register(&mut self, name: impl Into<String>, radix: usize) -> Result<usize> {
        let name = name.into();
        ensure!(radix > 0, "sub-parameter {name} must have at least one value");
        ensure!(
            self.position(&name).is_none(),
            "sub-parameter {name} registered twice"
        );
        self.total_variations = self
            .total_variations
            .checked_mul(radix)
            .ok_or_else(|| anyhow!("parameter space overflows usize after {name}"))?;
        self.params.push(SubParameter { name, radix });
        Ok(self.params.len() - 1)
    }

    /// Builder form of [`ParameterSpace::register`].
    pub fn with(mut self, name: impl Into<String>, radix: usize) -> Result<Self> {
        self.register(name, radix)?;
        Ok(self)
    }

    /// Product of all radixes; never zero.
    pub fn total_variations(&self) -> usize {
        self.total_variations
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubParameter> {
        self.params.iter()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|param| param.name == name)
    }

    /// Split `extra` into one digit per sub-parameter, in registration order.
    ///
    /// `extra` must be below [`ParameterSpace::total_variations`]; larger
    /// values wrap silently and are expected to be filtered by the caller.
    pub fn decode(&self, extra: usize) -> Vec<usize> {
        let mut weight = 1usize;
        self.params
            .iter()
            .map(|param| {
                let digit = (extra / weight) % param.radix;
                weight = weight.saturating_mul(param.radix);
                digit
            })
            .collect()
    }

    /// Digit of a single sub-parameter.
    pub fn digit(&self, extra: usize, position: usize) -> Option<usize> {
        let param = self.params.get(position)?;
        let weight: usize = self.params[..position].iter().map(|p| p.radix).product();
        Some((extra / weight) % param.radix)
    }

    /// Inverse of [`ParameterSpace::decode`]. Returns `None` when the digit
    /// count or any digit is out of range.
    pub fn encode(&self, digits: &[usize]) -> Option<usize> {
        if digits.len() != self.params.len() {
            return None;
        }
        let mut weight = 1usize;
        let mut extra = 0usize;
        for (digit, param) in digits.iter().zip(&self.params) {
            if *digit >= param.radix {
                return None;
            }
            extra += digit * weight;
            weight *= param.radix;
        }
        Some(extra)
    }

    /// Human readable `name=digit` rendering used in logs and reports.
    pub fn describe(&self, extra: usize) -> String {
        self.params
            .iter()
            .zip(self.decode(extra))
            .map(|(param, digit)| format!("{}={}", param.name, digit))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
