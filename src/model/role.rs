use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Display, EnumString, AsRefStr, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin = 1,
    Teacher = 2,
    Student = 3,
    Parent = 4,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Teacher),
            3 => Some(Role::Student),
            4 => Some(Role::Parent),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Only staff may write attendance.
    pub fn can_record_attendance(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }
}
