//! Client side of the document library: typed API calls, token handling and
//! the terminal views built on them.

pub mod api;
pub mod token;
pub mod views;
