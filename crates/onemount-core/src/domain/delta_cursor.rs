//! Delta cursor domain entity
//!
//! Wraps the opaque token the cloud provider returns from a delta query,
//! together with the bookkeeping the delta loop needs to know whether it is
//! still paging through a single delta response or has caught up and is
//! waiting out its poll interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::DeltaToken;

/// The delta loop's view of where it left off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaCursor {
    /// The most recent `deltaLink`/`nextLink` token. `None` means no
    /// successful delta query has completed yet and a full initial sync is
    /// required.
    token: Option<DeltaToken>,
    /// True while paging through a multi-page delta response
    /// (`nextLink` rather than `deltaLink`). The loop must keep requesting
    /// immediately, without waiting out the poll interval, while this holds.
    paging: bool,
    /// When this cursor was last advanced.
    updated_at: DateTime<Utc>,
}

impl DeltaCursor {
    /// Creates a fresh cursor representing "never synced".
    #[must_use]
    pub fn initial() -> Self {
        Self {
            token: None,
            paging: false,
            updated_at: Utc::now(),
        }
    }

    /// Restores a cursor from a previously persisted token.
    #[must_use]
    pub fn from_token(token: DeltaToken) -> Self {
        Self {
            token: Some(token),
            paging: false,
            updated_at: Utc::now(),
        }
    }

    /// Returns the current token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&DeltaToken> {
        self.token.as_ref()
    }

    /// Returns true if a full initial sync is still required.
    #[must_use]
    pub fn needs_initial_sync(&self) -> bool {
        self.token.is_none()
    }

    /// Returns true if the loop is mid-page and must not wait before its
    /// next request.
    #[must_use]
    pub fn is_paging(&self) -> bool {
        self.paging
    }

    /// Returns when this cursor was last advanced.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Advances the cursor after consuming a `nextLink` page: more pages
    /// remain, so the loop should request again immediately.
    pub fn advance_page(&mut self, next_token: DeltaToken) {
        self.token = Some(next_token);
        self.paging = true;
        self.updated_at = Utc::now();
    }

    /// Advances the cursor after consuming a `deltaLink`: the loop has
    /// caught up and should wait out its poll interval before the next
    /// request.
    pub fn advance_settled(&mut self, delta_token: DeltaToken) {
        self.token = Some(delta_token);
        self.paging = false;
        self.updated_at = Utc::now();
    }

    /// Discards the token, forcing a full resync on the next cycle (e.g.
    /// after a `410 Gone` / resync-required response from the cloud).
    pub fn reset(&mut self) {
        self.token = None;
        self.paging = false;
        self.updated_at = Utc::now();
    }
}

impl Default for DeltaCursor {
    fn default() -> Self {
        Self::initial()
    }
}
