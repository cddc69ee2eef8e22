//! Periodic and on-demand token price polling
//!
//! Every fetch is stamped when it is issued and written through
//! `AggregateState::set_token_price`, which keeps the newest oracle price by that
//! stamp. A timer tick and an out-of-band `refresh` for the same token may therefore
//! run concurrently; whichever was issued later wins regardless of completion order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use gastrack_core::{
    now_ms, ChainId, FetchError, PriceFeedConfig, PriceFeedError, PriceFeedResult, TokenPrice,
    TokenSymbol,
};
use gastrack_rpc::ChainRpc;
use gastrack_state::{AggregateState, PriceWrite};

use crate::feeds::{source_for, PriceSource};

/// A validated price and when it was requested
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceQuote {
    pub token: TokenSymbol,
    pub value: f64,
    pub fetched_at_ms: u64,
}

/// What a refresh did to the active price
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Updated { value: f64 },
    /// Valid, but a newer fetch already landed
    Superseded { value: f64 },
    /// Fetch failed before any price was known
    FallbackApplied { value: f64, error: PriceFeedError },
    /// Fetch failed; the prior price stays active
    Retained { error: PriceFeedError },
}

impl RefreshOutcome {
    pub fn is_update(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

struct TokenFeed {
    config: PriceFeedConfig,
    source: Arc<dyn PriceSource>,
}

/// Polls every configured token's oracle and writes accepted prices to state
pub struct PriceFeedPoller {
    state: Arc<AggregateState>,
    feeds: HashMap<TokenSymbol, TokenFeed>,
    fetch_timeout: Duration,
}

impl PriceFeedPoller {
    pub fn new(
        state: Arc<AggregateState>,
        rpc: Arc<dyn ChainRpc>,
        configs: &[PriceFeedConfig],
        fetch_timeout: Duration,
    ) -> Self {
        let feeds = configs
            .iter()
            .map(|config| (config.clone(), source_for(config, Arc::clone(&rpc))))
            .collect();

        Self::with_sources(state, feeds, fetch_timeout)
    }

    /// Poller over explicit sources
    pub fn with_sources(
        state: Arc<AggregateState>,
        feeds: Vec<(PriceFeedConfig, Arc<dyn PriceSource>)>,
        fetch_timeout: Duration,
    ) -> Self {
        let feeds = feeds
            .into_iter()
            .map(|(config, source)| (config.token, TokenFeed { config, source }))
            .collect();

        Self {
            state,
            feeds,
            fetch_timeout,
        }
    }

    pub fn tokens(&self) -> Vec<TokenSymbol> {
        let mut tokens: Vec<_> = self.feeds.keys().copied().collect();
        tokens.sort();
        tokens
    }

    /// Tokens whose oracle is read on `chain`
    pub fn tokens_on(&self, chain: ChainId) -> Vec<TokenSymbol> {
        let mut tokens: Vec<_> = self
            .feeds
            .values()
            .filter(|feed| feed.config.network == chain)
            .map(|feed| feed.config.token)
            .collect();
        tokens.sort();
        tokens
    }

    /// Query the oracle and validate the answer. Does not touch state.
    pub async fn fetch_price(&self, token: TokenSymbol) -> PriceFeedResult<PriceQuote> {
        let feed = self
            .feeds
            .get(&token)
            .ok_or(PriceFeedError::NotTracked(token))?;

        let fetched_at_ms = now_ms();
        let value = match tokio::time::timeout(self.fetch_timeout, feed.source.fetch()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    what: format!("{} price via {}", token, feed.source.name()),
                    after_ms: self.fetch_timeout.as_millis() as u64,
                }
                .into())
            }
        };

        let value = feed.config.range.validate(token, value)?;

        Ok(PriceQuote {
            token,
            value,
            fetched_at_ms,
        })
    }

    pub fn config(&self, token: TokenSymbol) -> Option<&PriceFeedConfig> {
        self.feeds.get(&token).map(|feed| &feed.config)
    }

    /// Fetch one token and apply the result. Failures never escape.
    pub async fn refresh(&self, token: TokenSymbol) -> RefreshOutcome {
        match self.fetch_price(token).await {
            Ok(quote) => self.write(token, quote.value, quote.fetched_at_ms),
            Err(error) => {
                warn!("{} price fetch discarded: {}", token, error);
                self.apply_fallback(token, error)
            }
        }
    }

    /// Validate a price observed on-chain at `observed_at_ms` (a pool swap) and write it
    /// under the same ordering as fetched prices. An invalid value is dropped; it never
    /// triggers a fallback.
    pub fn record(&self, token: TokenSymbol, value: f64, observed_at_ms: u64) -> RefreshOutcome {
        let Some(feed) = self.feeds.get(&token) else {
            return RefreshOutcome::Retained {
                error: PriceFeedError::NotTracked(token),
            };
        };

        match feed.config.range.validate(token, value) {
            Ok(value) => self.write(token, value, observed_at_ms),
            Err(e) => {
                warn!("{} observed price discarded: {}", token, e);
                RefreshOutcome::Retained { error: e.into() }
            }
        }
    }

    fn write(&self, token: TokenSymbol, value: f64, stamped_at_ms: u64) -> RefreshOutcome {
        match self.state.set_token_price(token, TokenPrice::oracle(value, stamped_at_ms)) {
            PriceWrite::Accepted => {
                debug!("{} price updated to {}", token, value);
                RefreshOutcome::Updated { value }
            }
            _ => {
                debug!("{} price {} superseded by a newer one", token, value);
                RefreshOutcome::Superseded { value }
            }
        }
    }

    fn apply_fallback(&self, token: TokenSymbol, error: PriceFeedError) -> RefreshOutcome {
        let Some(feed) = self.feeds.get(&token) else {
            return RefreshOutcome::Retained { error };
        };

        let has_price = self
            .state
            .token_price(token)
            .map(|p| p.is_set())
            .unwrap_or(false);
        if has_price {
            return RefreshOutcome::Retained { error };
        }

        let value = feed.config.fallback;
        match self.state.set_token_price(token, TokenPrice::fallback(value, now_ms())) {
            PriceWrite::Accepted => {
                info!("{} using fallback price {}", token, value);
                RefreshOutcome::FallbackApplied { value, error }
            }
            _ => RefreshOutcome::Retained { error },
        }
    }

    /// Refresh every tracked token concurrently
    pub async fn refresh_all(&self) -> Vec<(TokenSymbol, RefreshOutcome)> {
        let tokens = self.tokens();
        let outcomes = futures::future::join_all(tokens.iter().map(|t| self.refresh(*t))).await;
        tokens.into_iter().zip(outcomes).collect()
    }

    /// Start the periodic timer for one token; the first fetch runs immediately
    pub fn spawn(self: &Arc<Self>, token: TokenSymbol) -> Option<JoinHandle<()>> {
        let period = self.feeds.get(&token)?.config.poll_interval();
        let poller = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                poller.refresh(token).await;
            }
        }))
    }

    /// Timers for every token read on `chain`
    pub fn spawn_for_network(self: &Arc<Self>, chain: ChainId) -> Vec<JoinHandle<()>> {
        self.tokens_on(chain)
            .into_iter()
            .filter_map(|token| {
                info!("Polling {} price every {:?}", token, self.feeds.get(&token)?.config.poll_interval());
                self.spawn(token)
            })
            .collect()
    }
}
