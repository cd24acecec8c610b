use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::ops::RangeInclusive;
use thiserror::Error;

pub const FEATURE_COUNT: usize = 6;
pub const DEFAULT_GENDER: &str = "male";

const MALE_ALIASES: [&str; 3] = ["male", "m", "1"];
const AGE_RANGE: RangeInclusive<f64> = 10.0..=100.0;
const BMI_RANGE: RangeInclusive<f64> = 15.0..=40.0;
const MAX_DURATION_MINUTES: f64 = 480.0;
const HEART_RATE_RANGE: RangeInclusive<f64> = 40.0..=200.0;
// Celsius bounds, even though historical sample data was recorded in Fahrenheit.
const BODY_TEMPERATURE_RANGE: RangeInclusive<f64> = 35.0..=42.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("No JSON data provided")]
    NoJsonData,
    #[error("Missing required parameters")]
    MissingParameters,
    #[error("Invalid age")]
    InvalidAge,
    #[error("Invalid BMI")]
    InvalidBmi,
    #[error("Invalid duration")]
    InvalidDuration,
    #[error("Invalid heart rate")]
    InvalidHeartRate,
    #[error("Invalid body temperature")]
    InvalidBodyTemperature,
    #[error("Invalid input type")]
    InvalidInputType(String),
}

impl ValidationError {
    /// Human readable explanation sent next to the short error code.
    pub fn message(&self) -> String {
        match self {
            ValidationError::NoJsonData => "Please provide input data as JSON".to_string(),
            ValidationError::MissingParameters => {
                "Required: age, BMI, duration, heart_rate, body_temperature".to_string()
            }
            ValidationError::InvalidAge => "Age must be between 10 and 100".to_string(),
            ValidationError::InvalidBmi => "BMI must be between 15 and 40".to_string(),
            ValidationError::InvalidDuration => {
                "Duration must be between 1 and 480 minutes".to_string()
            }
            ValidationError::InvalidHeartRate => {
                "Heart rate must be between 40 and 200 BPM".to_string()
            }
            ValidationError::InvalidBodyTemperature => {
                "Body temperature must be between 35 and 42 °C".to_string()
            }
            ValidationError::InvalidInputType(reason) => reason.clone(),
        }
    }
}

/// Raw prediction request as sent by clients.
///
/// Every field is decoded as an untyped JSON value so that a missing
/// measurement is always reported before a malformed one. `null` counts as
/// missing. `gender` defaults to [`DEFAULT_GENDER`] when absent or null.
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionRequest {
    pub age: Option<Value>,
    #[serde(rename = "BMI")]
    pub bmi: Option<Value>,
    pub duration: Option<Value>,
    pub heart_rate: Option<Value>,
    pub body_temperature: Option<Value>,
    pub gender: Option<Value>,
}

/// A validated numeric input. Serializes as the number the client sent, so
/// `30` is echoed as `30` and not `30.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    value: f64,
    raw: Number,
}

impl Measurement {
    fn parse(field: &str, value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Number(raw) => match raw.as_f64() {
                Some(value) => Ok(Self { value, raw }),
                None => Err(not_a_number(field, &raw.to_string())),
            },
            other => Err(not_a_number(field, &other.to_string())),
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Serialize for Measurement {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

fn not_a_number(field: &str, got: &str) -> ValidationError {
    ValidationError::InvalidInputType(format!("{} must be a number, got {}", field, got))
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputDetails {
    pub age: Measurement,
    #[serde(rename = "BMI")]
    pub bmi: Measurement,
    pub duration: Measurement,
    pub heart_rate: Measurement,
    pub body_temperature: Measurement,
    pub gender: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(&self.0[..])
    }
}

/// Decodes a request body into validated input.
///
/// Empty or unparsable bodies, and JSON values that carry no data (`null`,
/// `{}`, `[]`, `false`, `0`, `""`), are all reported as missing JSON.
pub fn parse_request(body: &[u8]) -> Result<InputDetails, ValidationError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ValidationError::NoJsonData)?;
    if is_empty_payload(&value) {
        return Err(ValidationError::NoJsonData);
    }
    if !value.is_object() {
        return Err(ValidationError::InvalidInputType(
            "request body must be a JSON object".to_string(),
        ));
    }

    let request: PredictionRequest = serde_json::from_value(value)
        .map_err(|e| ValidationError::InvalidInputType(e.to_string()))?;
    request.validate()
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

impl PredictionRequest {
    /// Missing fields first, then each measurement in feature order, then
    /// gender. The first failure wins.
    pub fn validate(self) -> Result<InputDetails, ValidationError> {
        let (Some(age), Some(bmi), Some(duration), Some(heart_rate), Some(body_temperature)) = (
            self.age,
            self.bmi,
            self.duration,
            self.heart_rate,
            self.body_temperature,
        ) else {
            return Err(ValidationError::MissingParameters);
        };

        let age = check("age", age, |v| AGE_RANGE.contains(&v), ValidationError::InvalidAge)?;
        let bmi = check("BMI", bmi, |v| BMI_RANGE.contains(&v), ValidationError::InvalidBmi)?;
        let duration = check(
            "duration",
            duration,
            |v| v > 0.0 && v <= MAX_DURATION_MINUTES,
            ValidationError::InvalidDuration,
        )?;
        let heart_rate = check(
            "heart_rate",
            heart_rate,
            |v| HEART_RATE_RANGE.contains(&v),
            ValidationError::InvalidHeartRate,
        )?;
        let body_temperature = check(
            "body_temperature",
            body_temperature,
            |v| BODY_TEMPERATURE_RANGE.contains(&v),
            ValidationError::InvalidBodyTemperature,
        )?;

        let gender = match self.gender {
            None => DEFAULT_GENDER.to_string(),
            Some(Value::String(gender)) => gender.to_lowercase(),
            Some(other) => {
                return Err(ValidationError::InvalidInputType(format!(
                    "gender must be a string, got {}",
                    other
                )))
            }
        };

        Ok(InputDetails {
            age,
            bmi,
            duration,
            heart_rate,
            body_temperature,
            gender,
        })
    }
}

fn check(
    field: &str,
    value: Value,
    in_range: impl Fn(f64) -> bool,
    error: ValidationError,
) -> Result<Measurement, ValidationError> {
    let measurement = Measurement::parse(field, value)?;
    if in_range(measurement.value()) {
        Ok(measurement)
    } else {
        Err(error)
    }
}

/// 1 for "male", "m" or "1" (after lowercasing), 0 for anything else.
pub fn encode_gender(gender: &str) -> f64 {
    if MALE_ALIASES.contains(&gender.to_lowercase().as_str()) {
        1.0
    } else {
        0.0
    }
}

impl InputDetails {
    /// Feature order: age, BMI, duration, heart_rate, body_temperature, gender.
    pub fn feature_vector(&self) -> FeatureVector {
        FeatureVector::new([
            self.age.value(),
            self.bmi.value(),
            self.duration.value(),
            self.heart_rate.value(),
            self.body_temperature.value(),
            encode_gender(&self.gender),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_body() -> Value {
        json!({
            "age": 30,
            "BMI": 25,
            "duration": 30,
            "heart_rate": 120,
            "body_temperature": 37,
            "gender": "female"
        })
    }

    fn parse(value: &Value) -> Result<InputDetails, ValidationError> {
        parse_request(value.to_string().as_bytes())
    }

    fn with_field(field: &str, value: Value) -> Value {
        let mut body = valid_body();
        body[field] = value;
        body
    }

    #[test]
    fn test_valid_request_builds_feature_vector() {
        let details = parse(&valid_body()).unwrap();
        let features = details.feature_vector();

        assert_eq!(features.as_slice(), &[30.0, 25.0, 30.0, 120.0, 37.0, 0.0]);
        assert_eq!(details.gender, "female");
    }

    #[test]
    fn test_empty_payloads_are_no_json() {
        for body in ["", "   ", "{", "null", "{}", "[]", "false", "0", "\"\""] {
            assert_eq!(
                parse_request(body.as_bytes()),
                Err(ValidationError::NoJsonData),
                "body {:?}",
                body
            );
        }
    }

    #[test]
    fn test_non_object_payload_is_invalid_type() {
        assert!(matches!(
            parse_request(b"[30, 25, 30, 120, 37]"),
            Err(ValidationError::InvalidInputType(_))
        ));
    }

    #[test]
    fn test_each_missing_field_is_reported() {
        for field in ["age", "BMI", "duration", "heart_rate", "body_temperature"] {
            let mut body = valid_body();
            body.as_object_mut().unwrap().remove(field);
            assert_eq!(parse(&body), Err(ValidationError::MissingParameters), "{}", field);

            let nulled = with_field(field, Value::Null);
            assert_eq!(parse(&nulled), Err(ValidationError::MissingParameters), "{}", field);
        }
    }

    #[test]
    fn test_missing_field_wins_over_wrong_type() {
        let body = br#"{"age": "thirty", "BMI": 25, "duration": 30, "heart_rate": 120}"#;
        assert_eq!(parse_request(body), Err(ValidationError::MissingParameters));

        let mut body = with_field("BMI", json!("heavy"));
        body["duration"] = Value::Null;
        assert_eq!(parse(&body), Err(ValidationError::MissingParameters));
    }

    #[test]
    fn test_wrong_type_names_the_field() {
        let error = parse(&with_field("heart_rate", json!("fast"))).unwrap_err();

        assert_eq!(
            error,
            ValidationError::InvalidInputType("heart_rate must be a number, got \"fast\"".into())
        );
    }

    #[test]
    fn test_range_boundaries_are_inclusive() {
        let cases = [
            ("age", 10.0, 100.0, 9.0, 101.0, ValidationError::InvalidAge),
            ("BMI", 15.0, 40.0, 14.9, 40.1, ValidationError::InvalidBmi),
            ("heart_rate", 40.0, 200.0, 39.0, 201.0, ValidationError::InvalidHeartRate),
            (
                "body_temperature",
                35.0,
                42.0,
                34.9,
                42.1,
                ValidationError::InvalidBodyTemperature,
            ),
        ];

        for (field, low, high, below, above, error) in cases {
            assert!(parse(&with_field(field, json!(low))).is_ok(), "{} = {}", field, low);
            assert!(parse(&with_field(field, json!(high))).is_ok(), "{} = {}", field, high);
            assert_eq!(parse(&with_field(field, json!(below))), Err(error.clone()));
            assert_eq!(parse(&with_field(field, json!(above))), Err(error));
        }
    }

    #[test]
    fn test_integer_age_boundaries() {
        assert!(parse(&with_field("age", json!(10))).is_ok());
        assert!(parse(&with_field("age", json!(100))).is_ok());
        assert_eq!(parse(&with_field("age", json!(9))), Err(ValidationError::InvalidAge));
        assert_eq!(parse(&with_field("age", json!(101))), Err(ValidationError::InvalidAge));
    }

    #[test]
    fn test_duration_excludes_zero() {
        assert_eq!(
            parse(&with_field("duration", json!(0))),
            Err(ValidationError::InvalidDuration)
        );
        assert!(parse(&with_field("duration", json!(0.5))).is_ok());
        assert!(parse(&with_field("duration", json!(480))).is_ok());
        assert_eq!(
            parse(&with_field("duration", json!(481))),
            Err(ValidationError::InvalidDuration)
        );
    }

    #[test]
    fn test_first_failing_range_wins() {
        let mut body = with_field("age", json!(5));
        body["heart_rate"] = json!(500);
        assert_eq!(parse(&body), Err(ValidationError::InvalidAge));
    }

    #[test]
    fn test_fahrenheit_temperature_is_rejected() {
        let body = json!({
            "age": 25,
            "BMI": 24,
            "duration": 45,
            "heart_rate": 130,
            "body_temperature": 98.6,
            "gender": "male"
        });
        let error = parse(&body).unwrap_err();

        assert_eq!(error, ValidationError::InvalidBodyTemperature);
        assert_eq!(error.to_string(), "Invalid body temperature");
    }

    #[test]
    fn test_wrong_types_are_invalid_input() {
        for (field, value) in [
            ("age", json!("thirty")),
            ("BMI", json!(true)),
            ("duration", json!([30])),
            ("gender", json!(1)),
        ] {
            let result = parse(&with_field(field, value));
            assert!(
                matches!(result, Err(ValidationError::InvalidInputType(_))),
                "{} gave {:?}",
                field,
                result
            );
        }
    }

    #[test]
    fn test_gender_encoding() {
        for male in ["male", "Male", "M", "m", "1"] {
            assert_eq!(encode_gender(male), 1.0, "{}", male);
        }
        for other in ["female", "f", "0", "F", "unknown", ""] {
            assert_eq!(encode_gender(other), 0.0, "{}", other);
        }
    }

    #[test]
    fn test_gender_defaults_to_male_and_is_lowercased() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("gender");
        let details = parse(&body).unwrap();
        assert_eq!(details.gender, DEFAULT_GENDER);
        assert_eq!(details.feature_vector().as_slice()[5], 1.0);

        let details = parse(&with_field("gender", Value::Null)).unwrap();
        assert_eq!(details.gender, DEFAULT_GENDER);

        let details = parse(&with_field("gender", json!("FeMale"))).unwrap();
        assert_eq!(details.gender, "female");
    }

    #[test]
    fn test_details_echo_numbers_as_received() {
        let body = with_field("BMI", json!(24.5));
        let details = parse(&body).unwrap();
        let echoed = serde_json::to_value(&details).unwrap();

        assert_eq!(echoed["age"], json!(30));
        assert_eq!(echoed["BMI"], json!(24.5));
        assert_eq!(echoed["gender"], json!("female"));
    }
}
