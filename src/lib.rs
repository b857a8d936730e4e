// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: (C) 2025 Cranky Kernel <crankykernel@proton.me>

pub mod catalog;
pub mod config;
pub mod error;
pub mod event;
pub mod feed;
pub mod persist;
pub mod resolved;
pub mod scheduler;
pub mod upstream;

pub use catalog::{CatalogSnapshot, CatalogStore};
pub use config::Config;
pub use error::{FeedError, ResolutionFailure, UpstreamError};
pub use event::{Event, Sport};
pub use feed::FeedService;
pub use persist::PersistenceAdapter;
pub use resolved::ResolvedUrlCache;
pub use scheduler::RefreshScheduler;
pub use upstream::{PpvClient, UpstreamClient};
