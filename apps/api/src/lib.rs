pub mod router;
pub mod ticker;

pub use router::create_router;
