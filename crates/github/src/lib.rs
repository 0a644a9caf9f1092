//! GitHub infrastructure adapter for the dormant-user workflow.
//!
//! Implements [`dormancy::OrgDirectory`] over the GitHub REST and GraphQL
//! APIs with `reqwest`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules.
//! All GitHub API details (rate limiting, pagination, authentication) are handled
//! here; the [`dormancy`] crate never sees them.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`transport`] | Authenticated REST/GraphQL requests, rate-limit detection, `/rate_limit` probe |
//! | [`paginated`] | [`PaginatedApiClient`]: single-retry call paths and cursor pagination |
//! | [`client`] | [`GitHubClient`]: the organization directory |
//! | [`error`] | [`GitHubError`] and its conversion to the domain's provider error |

pub mod client;
pub mod error;
pub mod paginated;
pub mod transport;

pub use client::GitHubClient;
pub use error::{GitHubError, RateLimitResource};
pub use paginated::{
    Page, PageInfo, PaginatedApiClient, RateLimitProbe, TokioSleeper, DEFAULT_RATE_LIMIT_BUFFER,
};
pub use transport::{Transport, GITHUB_API_URL};
