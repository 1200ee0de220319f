pub mod booking;
pub mod clock;
pub mod directory;
pub mod engine;
pub mod error;
pub mod memory;
pub mod qr;
pub mod query;
pub mod registry;
pub mod repository;
pub mod seat;
pub mod user;
pub mod window;

pub use booking::{Booking, BookingRevision, BookingStatus};
pub use clock::{Clock, FixedClock, SystemClock};
pub use directory::{ProfileUpdate, StatusChange, UserDirectory};
pub use engine::BookingEngine;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use memory::InMemoryStore;
pub use qr::{IssuedToken, QrCodec, QrError};
pub use query::{AttendanceStats, BookingQuery, Page, PageBounds, Pagination, UserQuery};
pub use registry::{ReconcileReport, SeatRegistry};
pub use repository::{
    BookingRepository, InsertOutcome, SeatRepository, SeatWrite, StoreError, UserRepository, UserWrite,
};
pub use seat::{NewSeat, Seat, SeatFilter, SeatType, SeatUpdate};
pub use user::{NewUser, Principal, Role, User};
pub use window::{BookingRules, TimeWindow};
