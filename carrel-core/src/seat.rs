use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

const DESCRIPTION_MAX_LENGTH: usize = 200;

/// Seat category
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeatType {
    #[default]
    Regular,
    Premium,
    Window,
    Corner,
}

impl SeatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatType::Regular => "regular",
            SeatType::Premium => "premium",
            SeatType::Window => "window",
            SeatType::Corner => "corner",
        }
    }
}

impl fmt::Display for SeatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(SeatType::Regular),
            "premium" => Ok(SeatType::Premium),
            "window" => Ok(SeatType::Window),
            "corner" => Ok(SeatType::Corner),
            other => Err(CoreError::Validation(format!("Invalid seat type: {}", other))),
        }
    }
}

/// A bookable seat. `is_occupied` is a cache derived from live bookings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: Uuid,
    pub seat_number: String,
    #[serde(rename = "type")]
    pub seat_type: SeatType,
    pub floor: i32,
    pub section: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_occupied: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Seat {
    pub fn new(input: NewSeat, now: DateTime<Utc>) -> CoreResult<Self> {
        let input = input.normalize()?;
        Ok(Self {
            id: Uuid::new_v4(),
            seat_number: input.seat_number,
            seat_type: input.seat_type.unwrap_or_default(),
            floor: input.floor,
            section: input.section,
            description: input.description,
            is_active: true,
            is_occupied: false,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn is_available(&self) -> bool {
        self.is_active && !self.is_occupied
    }
}

/// Admin input for creating a seat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewSeat {
    pub seat_number: String,
    #[serde(rename = "type", default)]
    pub seat_type: Option<SeatType>,
    pub floor: i32,
    pub section: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewSeat {
    /// Trims and uppercases identifiers, then validates.
    pub fn normalize(self) -> CoreResult<Self> {
        let seat_number = normalize_code(&self.seat_number);
        if seat_number.is_empty() {
            return Err(CoreError::Validation("Seat number is required".to_string()));
        }
        let section = normalize_code(&self.section);
        if section.is_empty() {
            return Err(CoreError::Validation("Section is required".to_string()));
        }
        validate_floor(self.floor)?;
        let description = normalize_description(self.description)?;

        Ok(Self {
            seat_number,
            seat_type: self.seat_type,
            floor: self.floor,
            section,
            description,
        })
    }
}

/// Partial admin update. `is_active = Some(false)` is a deactivation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeatUpdate {
    #[serde(rename = "type", default)]
    pub seat_type: Option<SeatType>,
    #[serde(default)]
    pub floor: Option<i32>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl SeatUpdate {
    pub fn deactivates(&self, seat: &Seat) -> bool {
        seat.is_active && self.is_active == Some(false)
    }

    /// Applies the update in place. Occupancy is never touched here.
    pub fn apply(self, seat: &mut Seat, now: DateTime<Utc>) -> CoreResult<()> {
        if let Some(floor) = self.floor {
            validate_floor(floor)?;
            seat.floor = floor;
        }
        if let Some(section) = self.section {
            let section = normalize_code(&section);
            if section.is_empty() {
                return Err(CoreError::Validation("Section is required".to_string()));
            }
            seat.section = section;
        }
        if let Some(seat_type) = self.seat_type {
            seat.seat_type = seat_type;
        }
        if self.description.is_some() {
            seat.description = normalize_description(self.description)?;
        }
        if let Some(active) = self.is_active {
            seat.is_active = active;
        }
        seat.updated_at = now;
        Ok(())
    }
}

/// Listing filter. Inactive seats are hidden unless `include_inactive`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeatFilter {
    pub floor: Option<i32>,
    pub section: Option<String>,
    pub available: Option<bool>,
    pub include_inactive: bool,
}

impl SeatFilter {
    pub fn matches(&self, seat: &Seat) -> bool {
        if !self.include_inactive && !seat.is_active {
            return false;
        }
        if self.floor.is_some_and(|floor| floor != seat.floor) {
            return false;
        }
        if let Some(section) = &self.section {
            if normalize_code(section) != seat.section {
                return false;
            }
        }
        if self.available.is_some_and(|available| available != seat.is_available()) {
            return false;
        }
        true
    }
}

/// Seat numbers and sections are compared trimmed and uppercased.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

fn validate_floor(floor: i32) -> CoreResult<()> {
    if floor < 1 {
        return Err(CoreError::Validation("Floor must be at least 1".to_string()));
    }
    Ok(())
}

fn normalize_description(description: Option<String>) -> CoreResult<Option<String>> {
    let Some(text) = description else {
        return Ok(None);
    };
    let text = text.trim().to_string();
    if text.chars().count() > DESCRIPTION_MAX_LENGTH {
        return Err(CoreError::Validation(format!(
            "Description cannot exceed {} characters",
            DESCRIPTION_MAX_LENGTH
        )));
    }
    Ok(if text.is_empty() { None } else { Some(text) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_seat(number: &str, floor: i32, section: &str) -> NewSeat {
        NewSeat {
            seat_number: number.to_string(),
            seat_type: None,
            floor,
            section: section.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_new_seat_is_normalized() {
        let seat = Seat::new(new_seat("  a-12 ", 2, " north "), Utc::now()).unwrap();
        assert_eq!(seat.seat_number, "A-12");
        assert_eq!(seat.section, "NORTH");
        assert_eq!(seat.seat_type, SeatType::Regular);
        assert!(seat.is_active);
        assert!(!seat.is_occupied);
    }

    #[test]
    fn test_new_seat_validation() {
        assert!(Seat::new(new_seat("A1", 0, "N"), Utc::now()).is_err());
        assert!(Seat::new(new_seat("  ", 1, "N"), Utc::now()).is_err());
        assert!(Seat::new(new_seat("A1", 1, ""), Utc::now()).is_err());

        let mut input = new_seat("A1", 1, "N");
        input.description = Some("d".repeat(201));
        assert!(Seat::new(input, Utc::now()).is_err());
    }

    #[test]
    fn test_update_never_touches_occupancy() {
        let mut seat = Seat::new(new_seat("A1", 1, "N"), Utc::now()).unwrap();
        seat.is_occupied = true;

        let update = SeatUpdate {
            section: Some("south".to_string()),
            is_active: Some(false),
            ..Default::default()
        };
        assert!(update.deactivates(&seat));
        update.apply(&mut seat, Utc::now()).unwrap();

        assert_eq!(seat.section, "SOUTH");
        assert!(!seat.is_active);
        assert!(seat.is_occupied);
    }

    #[test]
    fn test_filter_hides_inactive_and_matches_section_case_insensitively() {
        let mut seat = Seat::new(new_seat("A1", 1, "north"), Utc::now()).unwrap();
        let filter = SeatFilter {
            section: Some("North".to_string()),
            available: Some(true),
            ..Default::default()
        };
        assert!(filter.matches(&seat));

        seat.is_occupied = true;
        assert!(!filter.matches(&seat));

        seat.is_occupied = false;
        seat.is_active = false;
        assert!(!filter.matches(&seat));
        assert!(SeatFilter { include_inactive: true, ..Default::default() }.matches(&seat));
    }

    #[test]
    fn test_seat_type_wire_names() {
        assert_eq!(serde_json::to_string(&SeatType::Corner).unwrap(), "\"corner\"");
        assert_eq!("window".parse::<SeatType>().unwrap(), SeatType::Window);
        assert!("sofa".parse::<SeatType>().is_err());
    }
}
