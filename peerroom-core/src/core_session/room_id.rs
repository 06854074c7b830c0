//! Room identifier conventions.
//!
//! Six-digit numeric ids are public rooms; four-digit numeric ids are
//! encrypted rooms joined together with a shared secret. Any other id is
//! accepted as-is and carries no kind.

use rand::Rng;

/// Kind of room implied by the shape of its id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Public,
    Encrypted,
}

impl RoomKind {
    /// Number of digits in ids of this kind
    pub fn digits(&self) -> usize {
        match self {
            RoomKind::Public => 6,
            RoomKind::Encrypted => 4,
        }
    }

    pub fn requires_secret(&self) -> bool {
        matches!(self, RoomKind::Encrypted)
    }

    /// Classify a room id by its shape
    pub fn classify(room_id: &str) -> Option<RoomKind> {
        if room_id.is_empty() || !room_id.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        match room_id.len() {
            6 => Some(RoomKind::Public),
            4 => Some(RoomKind::Encrypted),
            _ => None,
        }
    }
}

/// Draw a random room id of the given kind (no leading zero)
pub fn generate_room_id(kind: RoomKind) -> String {
    let low = 10u32.pow(kind.digits() as u32 - 1);
    let high = low * 10;
    rand::rng().random_range(low..high).to_string()
}
