//! Backend REST Adapter
//!
//! - `client`: reqwest-backed [`BackendClient`], also the
//!   [`SubscriptionBackend`](crate::application::ports::SubscriptionBackend)
//! - `api_types`: request and response bodies

pub mod api_types;
mod client;
mod error;

pub use api_types::{
    FeedStatus, FundsSegment, GttModifyRequest, GttPlaceRequest, GttRule, GttStrategy, GttType,
    OrderModifyRequest, OrderRequest, OrderType, Product, TransactionType, TriggerType, Validity,
};
pub use client::{BackendClient, HistoryQuery};
