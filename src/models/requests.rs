use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::titles::validate_criterion;
use crate::models::domain::{DurationMinutes, NewQueueEntry, UserId};

/// Request to join the queue for a criterion
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnqueueRequest {
    pub user_id: UserId,
    #[validate(custom(function = "validate_criterion_key"))]
    #[serde(alias = "criteria_key")]
    pub criterion: String,
    #[validate(range(min = 1, max = 2147483647))]
    pub duration_min: u32,
}

impl EnqueueRequest {
    /// Convert into the store's insert shape; call after `validate()`
    pub fn to_new_entry(&self) -> Option<NewQueueEntry> {
        Some(NewQueueEntry {
            user_id: self.user_id,
            criterion: self.criterion.clone(),
            duration_min: DurationMinutes::new(self.duration_min)?,
        })
    }
}

fn validate_criterion_key(value: &str) -> Result<(), ValidationError> {
    validate_criterion(value)
        .map(|_| ())
        .map_err(|_| ValidationError::new("criterion_key"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(criterion: &str, duration_min: u32) -> EnqueueRequest {
        EnqueueRequest {
            user_id: UserId::new(),
            criterion: criterion.to_string(),
            duration_min,
        }
    }

    #[test]
    fn test_valid_request() {
        let req = request("mokumoku", 60);
        assert!(req.validate().is_ok());
        assert_eq!(req.to_new_entry().map(|e| e.duration_min.get()), Some(60));
    }

    #[test]
    fn test_rejects_bad_fields() {
        assert!(request("", 60).validate().is_err());
        assert!(request(" dinner", 60).validate().is_err());
        assert!(request("din\nner", 60).validate().is_err());
        assert!(request("dinner", 0).validate().is_err());
    }

    #[test]
    fn test_accepts_original_field_name() {
        let json = serde_json::json!({
            "user_id": UserId::new(),
            "criteria_key": "english",
            "duration_min": 45,
        });
        let req: EnqueueRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.criterion, "english");
    }
}
