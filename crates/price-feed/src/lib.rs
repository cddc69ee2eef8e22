//! Token price feeds
//!
//! Features:
//! - Uniswap V3 `slot0` and Chainlink `latestRoundData` sources over `ChainRpc`
//! - Range validation with static fallbacks
//! - Per-token poll timers plus on-demand refresh
//! - Uniswap V3 `Swap` event watchers that move the price between polls

pub mod feeds;
pub mod poller;
pub mod swaps;

pub use feeds::{source_for, ChainlinkSource, PriceSource, UniswapV3Source};
pub use poller::{PriceFeedPoller, PriceQuote, RefreshOutcome};
pub use swaps::{decode_swap_price, watch_swaps};
