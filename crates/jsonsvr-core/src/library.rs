//! Helpers registered for scripts as the static module `lib`.
//!
//! ```text
//! ${lib::random_digits(8)}
//! ${lib::random_choice(["red", "green", "blue"])}
//! ${lib::random_digits(4, lib::CC_LOWER_ALPHANUM)}
//! ```

use rand::Rng;
use rhai::{Array, Dynamic, FLOAT, INT, ImmutableString, Map, Module};

pub const CC_NUMBERS: &str = "0123456789";
pub const CC_CAPITALS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const CC_LOWERCASES: &str = "abcdefghijklmnopqrstuvwxyz";

const DEFAULT_DIGITS: INT = 8;
const DEFAULT_MAX: INT = 100;

pub(crate) fn module() -> Module {
    let mut module = Module::new();

    module.set_var("CC_NUMBERS", CC_NUMBERS.to_string());
    module.set_var("CC_CAPITALS", CC_CAPITALS.to_string());
    module.set_var("CC_LOWERCASES", CC_LOWERCASES.to_string());
    module.set_var("CC_ALPHANUM", format!("{CC_NUMBERS}{CC_CAPITALS}"));
    module.set_var("CC_LOWER_ALPHANUM", format!("{CC_NUMBERS}{CC_LOWERCASES}"));
    module.set_var(
        "CC_MIX_ALPHANUM",
        format!("{CC_NUMBERS}{CC_LOWERCASES}{CC_CAPITALS}"),
    );

    module.set_native_fn("random_choice", |choices: Array| Ok(random_choice(&choices)));
    module.set_native_fn("weighted_random_choice", |choices: Map| {
        Ok(weighted_random_choice(&choices))
    });
    module.set_native_fn("random_digits", || Ok(random_digits(DEFAULT_DIGITS, CC_NUMBERS)));
    module.set_native_fn("random_digits", |len: INT| Ok(random_digits(len, CC_NUMBERS)));
    module.set_native_fn("random_digits", |len: INT, class: ImmutableString| {
        Ok(random_digits(len, class.as_str()))
    });
    module.set_native_fn("random_number", || Ok(random_number(DEFAULT_MAX, 0)));
    module.set_native_fn("random_number", |max: INT| Ok(random_number(max, 0)));
    module.set_native_fn("random_number", |max: INT, min: INT| Ok(random_number(max, min)));
    module.set_native_fn("condition", |flag: bool, then: Dynamic, otherwise: Dynamic| {
        Ok(if flag { then } else { otherwise })
    });

    module
}

fn random_choice(choices: &Array) -> Dynamic {
    if choices.is_empty() {
        return Dynamic::UNIT;
    }
    let idx = rand::thread_rng().gen_range(0..choices.len());
    choices[idx].clone()
}

fn weight_of(value: &Dynamic) -> f64 {
    if let Ok(i) = value.as_int() {
        return i.max(0) as f64;
    }
    value
        .as_float()
        .map(|f: FLOAT| f.max(0.0))
        .unwrap_or(0.0)
}

fn weighted_random_choice(choices: &Map) -> Dynamic {
    let total: f64 = choices.values().map(weight_of).sum();
    if total <= 0.0 {
        return Dynamic::UNIT;
    }

    let target = rand::thread_rng().gen_range(0.0..total);
    let mut acc = 0.0;
    for (key, weight) in choices {
        acc += weight_of(weight);
        if target < acc {
            return Dynamic::from(key.to_string());
        }
    }
    choices
        .keys()
        .last()
        .map(|k| Dynamic::from(k.to_string()))
        .unwrap_or(Dynamic::UNIT)
}

fn random_digits(len: INT, class: &str) -> String {
    let chars: Vec<char> = class.chars().collect();
    if chars.is_empty() || len <= 0 {
        return String::new();
    }
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| chars[rng.gen_range(0..chars.len())])
        .collect()
}

fn random_number(max: INT, min: INT) -> INT {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    rand::thread_rng().gen_range(lo..=hi)
}
