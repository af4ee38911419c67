//! Types library for the streaming engine
//!
//! Record shapes that venue adapters produce from vendor frames and that the
//! engine's caches store. Everything here is plain data: no I/O, no clocks.
//!
//! # Modules
//! - `ids`: Symbol identifiers (`BASE/QUOTE` unified symbols)
//! - `numeric`: Decimal parsing and canonical rendering
//! - `record`: `Timestamped` / `Keyed` traits the caches are generic over
//! - `order`: Order side, status and the unified order record
//! - `trade`: Unified public/private trade record
//! - `position`: Derivatives position record
//! - `ohlcv`: Candle bar record and timeframes
//! - `errors`: Parse errors for record fields

pub mod ids;
pub mod numeric;
pub mod record;
pub mod order;
pub mod trade;
pub mod position;
pub mod ohlcv;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::numeric::*;
    pub use crate::ohlcv::*;
    pub use crate::order::*;
    pub use crate::position::*;
    pub use crate::record::*;
    pub use crate::trade::*;
}
