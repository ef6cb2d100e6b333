use std::collections::HashMap;

use tracing::debug;

/// Converts an amount between currencies. Optional collaborator: failures
/// degrade to "salary unknown" rather than blocking the pipeline.
pub trait CurrencyConverter {
    fn convert(&self, amount: f64, from: &str, to: &str) -> Option<f64>;
}

/// Fixed conversion table, rates expressed as units of the base currency
/// per one unit of the foreign currency.
#[derive(Debug, Clone)]
pub struct FixedRates {
    base: String,
    to_base: HashMap<String, f64>,
}

impl FixedRates {
    pub fn new(base: &str, to_base: HashMap<String, f64>) -> Self {
        Self {
            base: base.to_uppercase(),
            to_base,
        }
    }

    /// AED base with the conversion rates the agent has always used.
    pub fn aed_default() -> Self {
        let mut to_base = HashMap::new();
        to_base.insert("USD".to_string(), 3.67);
        to_base.insert("CAD".to_string(), 2.72);
        to_base.insert("EUR".to_string(), 3.98);
        to_base.insert("GBP".to_string(), 4.65);
        Self::new("AED", to_base)
    }

    /// Overlay configured rates on the built-in table.
    pub fn merged(mut self, extra: &HashMap<String, f64>) -> Self {
        for (currency, rate) in extra {
            self.to_base.insert(currency.to_uppercase(), *rate);
        }
        self
    }
}

impl CurrencyConverter for FixedRates {
    fn convert(&self, amount: f64, from: &str, to: &str) -> Option<f64> {
        let from = from.to_uppercase();
        let to = to.to_uppercase();
        if from == to {
            return Some(amount);
        }
        // Only conversions into the base currency are supported.
        if to != self.base {
            return None;
        }
        self.to_base.get(&from).map(|rate| amount * rate)
    }
}

/// Parse free-form salary text into a monthly AED amount.
///
/// Handles currency tags (AED/USD/CAD/...), thousands separators, k/m
/// suffixes, and yearly amounts (divided by 12). Returns None whenever the
/// text cannot be read; an unparseable salary never fails the pipeline.
pub fn normalize_salary(text: &str, converter: &dyn CurrencyConverter) -> Option<i64> {
    let cleaned = text.replace(',', "").to_lowercase();
    if cleaned.trim().is_empty() {
        return None;
    }

    let known = ["aed", "usd", "cad", "eur", "gbp"]
        .iter()
        .find(|c| cleaned.contains(*c))
        .map(|c| c.to_uppercase());
    let currency = match known {
        Some(c) => c,
        None if cleaned.contains('$') => "USD".to_string(),
        None => {
            // A currency-looking tag we do not recognize makes the amount
            // unsafe to read as AED.
            let tagged = regex::Regex::new(r"\b[a-z]{3}\b\s*\d")
                .map(|re| re.is_match(&cleaned))
                .unwrap_or(false);
            if tagged {
                return None;
            }
            "AED".to_string()
        }
    };

    let mut amount = first_number(&cleaned)?;

    // Suffix must sit on the number itself: "120k" or "1.2m", not the 'k'
    // in "week" or the 'm' in "month".
    let suffixed = |s: &str| {
        regex::Regex::new(&format!(r"\d\s*{s}\b"))
            .ok()
            .is_some_and(|re| re.is_match(&cleaned))
    };
    if suffixed("k") || cleaned.contains("thousand") {
        amount *= 1_000.0;
    } else if suffixed("m") || cleaned.contains("million") {
        amount *= 1_000_000.0;
    }

    if cleaned.contains("year") || cleaned.contains("annum") || cleaned.contains("annual") {
        amount /= 12.0;
    }

    match converter.convert(amount, &currency, "AED") {
        Some(aed) if aed > 0.0 => Some(aed.round() as i64),
        Some(_) => None,
        None => {
            debug!(currency, "no conversion rate, treating salary as unknown");
            None
        }
    }
}

/// Whether a record passes the configured salary floor. Unknown salaries
/// pass: a missing number is not grounds to drop a job.
pub fn meets_minimum(salary_aed: Option<i64>, min_salary_aed: Option<i64>) -> bool {
    match (salary_aed, min_salary_aed) {
        (Some(salary), Some(min)) => salary >= min,
        _ => true,
    }
}

fn first_number(text: &str) -> Option<f64> {
    let mut num = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() || (ch == '.' && !num.is_empty()) {
            num.push(ch);
        } else if !num.is_empty() {
            break;
        }
    }
    num.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates() -> FixedRates {
        FixedRates::aed_default()
    }

    #[test]
    fn aed_amounts_pass_through() {
        assert_eq!(normalize_salary("AED 15,000", &rates()), Some(15_000));
        assert_eq!(normalize_salary("15000 aed per month", &rates()), Some(15_000));
    }

    #[test]
    fn usd_converts_at_fixed_rate() {
        assert_eq!(normalize_salary("USD 5,000", &rates()), Some(18_350));
        assert_eq!(normalize_salary("$5000/month", &rates()), Some(18_350));
    }

    #[test]
    fn k_suffix_and_annual_amounts() {
        // 120k USD per year -> 10k USD monthly -> 36,700 AED
        assert_eq!(normalize_salary("$120k per year", &rates()), Some(36_700));
        assert_eq!(normalize_salary("AED 180k / year", &rates()), Some(15_000));
    }

    #[test]
    fn untagged_numbers_assume_aed() {
        assert_eq!(normalize_salary("12000 monthly", &rates()), Some(12_000));
    }

    #[test]
    fn garbage_degrades_to_unknown() {
        assert_eq!(normalize_salary("competitive", &rates()), None);
        assert_eq!(normalize_salary("", &rates()), None);
        assert_eq!(normalize_salary("DOE", &rates()), None);
    }

    #[test]
    fn unknown_currency_degrades_to_unknown() {
        assert_eq!(normalize_salary("JPY 800000", &rates()), None);
    }

    #[test]
    fn minimum_gate_lets_unknowns_through() {
        assert!(meets_minimum(None, Some(20_000)));
        assert!(meets_minimum(Some(25_000), Some(20_000)));
        assert!(!meets_minimum(Some(15_000), Some(20_000)));
        assert!(meets_minimum(Some(15_000), None));
    }
}
