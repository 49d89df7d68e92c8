/// Equivalence Checker - Output Comparison Logic
///
/// **Core Responsibility:**
/// Decide whether a value returned by a candidate matches the reference value.
///
/// **Critical Properties:**
/// - Knows nothing about processes, scratch directories or deadlines
/// - Pure function: (observed, expected, tolerance, entry point, input) -> bool
/// - Never panics; anything that cannot be compared is simply not equivalent
///
/// **Comparison Rules (in order):**
/// 1. Strict equality, with numeric semantics (`1 == 1.0`, `true == 1`)
/// 2. Polynomial-root oracle for `find_zero`, even when strict equality held
/// 3. Float-valued expectations declared with `atol == 0` get `atol = 1e-6`
/// 4. On strict mismatch with non-zero `atol`: element-wise closeness,
///    scalars broadcast against arrays
/// 5. Otherwise not equivalent
///
/// Values arrive as JSON. Non-finite floats travel as `{"$float": "nan" | "inf" | "-inf"}`.
/// Integers of any width keep their exact digits and never count as floats.
use arbiter_common::config::FLOAT_EPSILON;
use serde_json::{Map, Number, Value};

/// Entry point whose output is judged by the polynomial-root oracle
pub const POLYNOMIAL_ORACLE: &str = "find_zero";

/// Relative term of the closeness test, the usual allclose default
const RELATIVE_TOLERANCE: f64 = 1e-7;

const FLOAT_MARKER: &str = "$float";

/// Check an observed output against the expected one
///
/// ## Arguments
/// * `observed` - Value returned by the candidate
/// * `expected` - Reference value
/// * `atol` - Declared absolute tolerance (0 means exact, except for floats)
/// * `entry_point` - Name of the invoked function, selects special oracles
/// * `raw_input` - Positional arguments the function was called with
pub fn matches(
    observed: &Value,
    expected: &Value,
    atol: f64,
    entry_point: &str,
    raw_input: &[Value],
) -> bool {
    let exact_match = strict_eq(observed, expected);

    if entry_point == POLYNOMIAL_ORACLE && !polynomial_root_holds(observed, raw_input, atol) {
        return false;
    }

    let atol = if atol == 0.0 && is_floats(expected) {
        FLOAT_EPSILON
    } else {
        atol
    };

    if !exact_match && atol != 0.0 {
        return all_close(observed, expected, atol);
    }

    exact_match
}

/// Numeric view of a scalar: numbers, booleans and non-finite float markers
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Object(map) => float_marker(map),
        _ => None,
    }
}

fn float_marker(map: &Map<String, Value>) -> Option<f64> {
    if map.len() != 1 {
        return None;
    }
    match map.get(FLOAT_MARKER)?.as_str()? {
        "nan" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

fn is_float(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_f64(),
        Value::Object(map) => float_marker(map).is_some(),
        _ => false,
    }
}

/// A float, or a flat sequence of floats (vacuously true when empty)
fn is_floats(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().all(is_float),
        other => is_float(other),
    }
}

/// Equality with numeric coercion; NaN equals nothing
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| strict_eq(x, y))
        }
        (Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
        (Value::Object(x), Value::Object(y))
            if float_marker(x).is_none() && float_marker(y).is_none() =>
        {
            x.len() == y.len()
                && x.iter().all(|(key, xv)| y.get(key).is_some_and(|yv| strict_eq(xv, yv)))
        }
        _ => matches!((as_number(a), as_number(b)), (Some(x), Some(y)) if x == y),
    }
}

/// Integers compare by their exact decimal text, an integer and a float
/// compare by the float's exact value, floats compare as `f64`
fn numbers_equal(x: &Number, y: &Number) -> bool {
    match (integer_text(x), integer_text(y)) {
        (Some(a), Some(b)) => a == b,
        (Some(int), None) => float_equals_integer(y, &int),
        (None, Some(int)) => float_equals_integer(x, &int),
        (None, None) => matches!((x.as_f64(), y.as_f64()), (Some(a), Some(b)) if a == b),
    }
}

/// Decimal text of an integer-valued number, whatever its width
fn integer_text(n: &Number) -> Option<String> {
    if let Some(i) = n.as_i64() {
        return Some(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Some(u.to_string());
    }
    if n.is_f64() {
        return None;
    }
    // Wider than 64 bits: arbitrary precision keeps the literal as written
    Some(n.to_string())
}

fn float_equals_integer(float: &Number, integer: &str) -> bool {
    let Some(f) = float.as_f64() else {
        return false;
    };
    if !f.is_finite() || f.fract() != 0.0 {
        return false;
    }
    if f == 0.0 {
        return integer == "0";
    }
    format!("{:.0}", f) == integer
}

/// Flattened numeric array with its shape; `None` for anything non-numeric or ragged
fn to_tensor(value: &Value) -> Option<(Vec<usize>, Vec<f64>)> {
    match value {
        Value::Array(items) => {
            let mut shape: Option<Vec<usize>> = None;
            let mut data = Vec::new();
            for item in items {
                let (child_shape, child_data) = to_tensor(item)?;
                match &shape {
                    Some(existing) if *existing != child_shape => return None,
                    Some(_) => {}
                    None => shape = Some(child_shape),
                }
                data.extend(child_data);
            }
            let mut full_shape = vec![items.len()];
            full_shape.extend(shape.unwrap_or_default());
            Some((full_shape, data))
        }
        scalar => as_number(scalar).map(|x| (Vec::new(), vec![x])),
    }
}

fn close(observed: f64, expected: f64, atol: f64) -> bool {
    if observed.is_nan() || expected.is_nan() {
        return observed.is_nan() && expected.is_nan();
    }
    if observed.is_infinite() || expected.is_infinite() {
        return observed == expected;
    }
    (observed - expected).abs() <= atol + RELATIVE_TOLERANCE * expected.abs()
}

/// Element-wise closeness with scalar broadcasting
fn all_close(observed: &Value, expected: &Value, atol: f64) -> bool {
    let (Some((obs_shape, obs)), Some((exp_shape, exp))) = (to_tensor(observed), to_tensor(expected))
    else {
        return false;
    };

    if obs_shape == exp_shape {
        obs.iter().zip(&exp).all(|(o, e)| close(*o, *e, atol))
    } else if obs_shape.is_empty() {
        exp.iter().all(|e| close(obs[0], *e, atol))
    } else if exp_shape.is_empty() {
        obs.iter().all(|o| close(*o, exp[0], atol))
    } else {
        false
    }
}

fn coefficients(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(as_number).collect()
}

fn evaluate_polynomial(coefficients: &[f64], x: f64) -> f64 {
    coefficients
        .iter()
        .enumerate()
        .map(|(i, c)| c * x.powi(i as i32))
        .sum()
}

/// `|poly(x)| <= atol`, where one side supplies the coefficient sequence and
/// the other the evaluation point.
///
/// Coefficients returned with the point passed in are tried first, then the
/// usual shape of root-finding problems: coefficients passed in, root returned.
fn polynomial_root_holds(observed: &Value, raw_input: &[Value], atol: f64) -> bool {
    let point_argument = match raw_input {
        [single] => as_number(single),
        _ => None,
    };

    let residual = match (coefficients(observed), point_argument) {
        (Some(coeffs), Some(x)) => evaluate_polynomial(&coeffs, x),
        _ => {
            let coeffs = raw_input.first().and_then(coefficients);
            match (coeffs, as_number(observed)) {
                (Some(coeffs), Some(x)) => evaluate_polynomial(&coeffs, x),
                _ => return false,
            }
        }
    };

    residual.abs() <= atol
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(observed: Value, expected: Value, atol: f64) -> bool {
        matches(&observed, &expected, atol, "candidate", &[])
    }

    #[test]
    fn test_reflexive_for_plain_entry_points() {
        for value in [
            json!(1),
            json!("text"),
            json!([1, [2, 3], {"k": null}]),
            json!(null),
            json!(true),
            json!(2.5),
            json!([]),
        ] {
            assert!(check(value.clone(), value, 0.0));
        }
    }

    #[test]
    fn test_numeric_coercion() {
        assert!(check(json!(1), json!(1.0), 0.0));
        assert!(check(json!(true), json!(1), 0.0));
        assert!(check(json!([1, 2]), json!([1.0, 2.0]), 0.0));
        assert!(!check(json!("1"), json!(1), 0.0));
    }

    #[test]
    fn test_float_epsilon_upgrade() {
        assert!(check(json!(1.0000005), json!(1.0), 0.0));
        assert!(!check(json!(1.001), json!(1.0), 0.0));
        assert!(check(json!([0.1, 0.2000001]), json!([0.1, 0.2]), 0.0));
    }

    #[test]
    fn test_integers_are_exact_without_tolerance() {
        assert!(!check(json!(3), json!(4), 0.0));
        assert!(check(json!(3), json!(4), 1.0));
    }

    fn number(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    #[test]
    fn test_wide_integers_are_exact() {
        let reference = number("1180591620717411303424");
        assert!(check(reference.clone(), reference.clone(), 0.0));
        assert!(!check(number("1180591620717411303425"), reference, 0.0));
        assert!(!check(number("100000000000000000000001"), number("100000000000000000000000"), 0.0));
        assert!(!check(number("-100000000000000000000001"), number("-100000000000000000000000"), 0.0));
        // 25! and a neighbour, as a factorial problem would return them
        assert!(!check(
            number("15511210043330985984000001"),
            number("15511210043330985984000000"),
            0.0
        ));
    }

    #[test]
    fn test_wide_integers_are_not_floats() {
        assert!(!is_floats(&number("1180591620717411303424")));
        assert!(!is_floats(&number("[1180591620717411303424, 5]")));
        assert!(is_floats(&number("1.5e23")));
    }

    #[test]
    fn test_integer_against_float_is_exact() {
        // 1e23 is not exactly representable; its nearest double is 99999999999999991611392
        assert!(strict_eq(&number("99999999999999991611392"), &number("1e23")));
        assert!(!strict_eq(&number("100000000000000000000000"), &number("1e23")));
        assert!(strict_eq(&number("0"), &number("-0.0")));
        assert!(!strict_eq(&number("2"), &number("2.5")));
    }

    #[test]
    fn test_declared_tolerance() {
        assert!(check(json!([1.0, 2.05]), json!([1.0, 2.0]), 0.1));
        assert!(!check(json!([1.0, 2.5]), json!([1.0, 2.0]), 0.1));
    }

    #[test]
    fn test_scalar_broadcast_and_shape_mismatch() {
        assert!(check(json!(2.0), json!([2.0, 2.0000001]), 1e-3));
        assert!(check(json!([[1.0, 1.0], [1.0, 1.0]]), json!(1.0), 1e-3));
        assert!(!check(json!([1.0, 2.0]), json!([1.0, 2.0, 3.0]), 1e-3));
        // Ragged values cannot be compared numerically but still match exactly
        let ragged = json!([[1.0], [2.0, 3.0]]);
        assert!(check(ragged.clone(), ragged, 1e-3));
        assert!(!check(json!([[1.0], [2.0, 3.5]]), json!([[1.0], [2.0, 3.0]]), 1e-3));
    }

    #[test]
    fn test_non_numeric_never_close() {
        assert!(!check(json!("abc"), json!("abd"), 0.5));
        assert!(!check(json!(null), json!(0.0), 0.5));
    }

    #[test]
    fn test_non_finite_markers() {
        let nan = json!({"$float": "nan"});
        let inf = json!({"$float": "inf"});
        assert!(!strict_eq(&nan, &nan));
        // NaN only matches NaN through the tolerance path
        assert!(check(nan.clone(), nan.clone(), 0.0));
        assert!(check(inf.clone(), inf.clone(), 0.0));
        assert!(!check(inf, json!({"$float": "-inf"}), 0.0));
        assert!(!check(nan, json!(1.0), 0.0));
    }

    #[test]
    fn test_repr_markers_compare_by_text() {
        let a = json!({"$repr": "<object at 0x1>"});
        assert!(check(a.clone(), a, 0.0));
        assert!(!check(json!({"$repr": "x"}), json!({"$repr": "y"}), 0.0));
    }

    #[test]
    fn test_polynomial_oracle_root_returned() {
        // x^2 - 4 has a root at 2
        let input = [json!([-4.0, 0.0, 1.0])];
        assert!(matches(&json!(2.0), &json!(2.0), 1e-6, POLYNOMIAL_ORACLE, &input));
        // A root other than the reference one still passes the oracle, then
        // goes through the tolerance path
        assert!(!matches(&json!(-2.0), &json!(2.0), 1e-6, POLYNOMIAL_ORACLE, &input));
        // Exact match does not bypass the oracle
        assert!(!matches(&json!(3.0), &json!(3.0), 1e-6, POLYNOMIAL_ORACLE, &input));
    }

    #[test]
    fn test_polynomial_oracle_coefficients_returned() {
        // 1 + x evaluated at -1
        let input = [json!(-1.0)];
        assert!(matches(&json!([1.0, 1.0]), &json!([1.0, 1.0]), 1e-9, POLYNOMIAL_ORACLE, &input));
        assert!(!matches(&json!([2.0, 1.0]), &json!([2.0, 1.0]), 1e-9, POLYNOMIAL_ORACLE, &input));
    }

    #[test]
    fn test_polynomial_oracle_rejects_unusable_values() {
        let input = [json!("not a polynomial")];
        assert!(!matches(&json!(1.0), &json!(1.0), 1e-6, POLYNOMIAL_ORACLE, &input));
    }
}
