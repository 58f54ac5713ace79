use serde::{Deserialize, Serialize};

/// One decoded CSV row, ready to be persisted as a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub first_name: String,
    pub last_name: String,
    pub age: i64,
    pub email: String,
}

impl Record {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        age: i64,
        email: impl Into<String>,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            age,
            email: email.into(),
        }
    }
}
