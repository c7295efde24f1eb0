//! Call links: `https://host/<call id>` to join, with `#init` for the creator.

use crate::session::{CallId, Role};
use crate::utils::random_id;
use crate::{CallError, Result};
use url::Url;

const INITIATOR_FRAGMENT: &str = "init";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLink {
    base: Url,
    pub call_id: CallId,
    pub role: Role,
}

impl CallLink {
    pub fn parse(link: &str) -> Result<Self> {
        let url = Url::parse(link).map_err(|e| CallError::InvalidLink(e.to_string()))?;

        let id = url
            .path_segments()
            .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
            .ok_or_else(|| CallError::InvalidLink(format!("no call id in '{}'", link)))?;
        let call_id = CallId::new(id)?;

        let role = if url.fragment() == Some(INITIATOR_FRAGMENT) {
            Role::Initiator
        } else {
            Role::Joiner
        };

        let mut base = url.clone();
        base.set_fragment(None);
        base.set_query(None);
        base.set_path("/");

        Ok(Self {
            base,
            call_id,
            role,
        })
    }

    /// Fresh link for a new call, owned by the initiator
    pub fn generate(base: &str) -> Result<Self> {
        let mut base = Url::parse(base).map_err(|e| CallError::InvalidLink(e.to_string()))?;
        base.set_fragment(None);
        base.set_query(None);
        base.set_path("/");
        Ok(Self {
            base,
            call_id: CallId::new(random_id())?,
            role: Role::Initiator,
        })
    }

    /// The link to hand to the other party
    pub fn share_url(&self) -> String {
        format!("{}{}", self.base, self.call_id)
    }

    pub fn initiator_url(&self) -> String {
        format!("{}#{}", self.share_url(), INITIATOR_FRAGMENT)
    }
}
