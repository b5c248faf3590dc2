//! Typed parameters for the request types that carry validation rules.
//!
//! Request types without an entry here are checked only by their templates.

use crate::services::error::RelayError;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::borrow::Cow;
use validator::{Validate, ValidationError};

pub const TRIPADVISOR_REQUEST: &str = "tripadvisor_request";
pub const INDEED_REQUEST: &str = "indeed_request";

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "kids_ages_match_num_kids"))]
pub struct TripAdvisorParameters {
    #[validate(range(min = 1, message = "At least one adult is required"))]
    pub num_adults: i64,

    #[serde(default)]
    #[validate(range(min = 0, message = "Number of kids cannot be negative"))]
    pub num_kids: i64,

    #[serde(default)]
    #[validate(custom(function = "non_negative_ages"))]
    pub kids_ages: Vec<i64>,

    #[validate(custom(function = "calendar_date"))]
    pub start_date: String,

    #[validate(custom(function = "calendar_date"))]
    pub end_date: String,

    #[validate(length(min = 1, message = "Hotel name is required"))]
    pub hotel_name: String,

    #[validate(length(min = 1, message = "Hotel type is required"))]
    pub hotel_type: String,

    #[validate(range(min = 0.0, max = 5.0, message = "Hotel rating must be between 0 and 5"))]
    pub hotel_rating: f64,

    #[validate(range(min = 1, message = "Hotel reviews must be positive"))]
    pub hotel_reviews: i64,

    #[validate(range(min = 1, message = "Hotel ranking must be positive"))]
    pub hotel_ranking: i64,

    #[validate(length(min = 1, message = "Cards are required"))]
    pub cards: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IndeedParameters {
    #[validate(length(min = 1, message = "Job title is required"))]
    pub job_title: String,

    #[validate(length(min = 1, message = "Job description is required"))]
    pub job_description: String,

    #[validate(
        length(min = 1, message = "At least one skill is required"),
        custom(function = "no_blank_entries")
    )]
    pub skills: Vec<String>,

    #[validate(range(min = 0, message = "Experience cannot be negative"))]
    pub experience: i64,

    #[validate(length(min = 1, message = "Education is required"))]
    pub education: String,

    #[validate(length(min = 1, message = "Location is required"))]
    pub location: String,

    #[validate(range(min = 0.0, message = "Salary cannot be negative"))]
    pub salary: f64,

    #[validate(length(min = 1, message = "Job type is required"))]
    pub job_type: String,

    #[validate(length(min = 1, message = "Resume text is required"))]
    pub resume_text: String,

    #[validate(length(min = 1, message = "Cards are required"))]
    pub cards: String,
}

/// Apply the typed rules for `request_type`, if it has any.
pub fn validate_parameters(
    request_type: &str,
    parameters: &serde_json::Value,
) -> Result<(), RelayError> {
    match request_type {
        TRIPADVISOR_REQUEST => check::<TripAdvisorParameters>(parameters),
        INDEED_REQUEST => check::<IndeedParameters>(parameters),
        _ => Ok(()),
    }
}

fn check<T: DeserializeOwned + Validate>(parameters: &serde_json::Value) -> Result<(), RelayError> {
    let typed: T = serde_json::from_value(parameters.clone()).map_err(|e| {
        RelayError::ValidationFailure(format!("invalid parameters: {}", e))
    })?;

    typed
        .validate()
        .map_err(|e| RelayError::ValidationFailure(e.to_string()))
}

fn failure(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

fn calendar_date(value: &str) -> Result<(), ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| failure("calendar_date", "Date must be formatted as YYYY-MM-DD"))
}

fn non_negative_ages(ages: &[i64]) -> Result<(), ValidationError> {
    if ages.iter().any(|age| *age < 0) {
        return Err(failure("non_negative_ages", "Kids ages cannot be negative"));
    }
    Ok(())
}

fn no_blank_entries(values: &[String]) -> Result<(), ValidationError> {
    if values.iter().any(|value| value.trim().is_empty()) {
        return Err(failure("no_blank_entries", "Skills cannot contain empty entries"));
    }
    Ok(())
}

/// One age per kid, and no ages without kids.
fn kids_ages_match_num_kids(params: &TripAdvisorParameters) -> Result<(), ValidationError> {
    let expected = usize::try_from(params.num_kids).unwrap_or(0);
    if params.kids_ages.len() != expected {
        return Err(failure(
            "kids_ages_match_num_kids",
            "kids_ages must list one age per kid",
        ));
    }
    Ok(())
}
