//! PKIStatusInfo handling and human-readable status diagnostics
//!
//! A `PKIStatusInfo` is interpreted uniformly across every response type:
//! the status code, the optional failure-info bit string, and the optional
//! free-text sequence are saved into the transaction context and rendered
//! as one diagnostic line.

use crate::context::CmpContext;
use crate::error::{CmpError, Result};
use crate::types::{FailInfo, PkiStatus};

/// Upper bound on a rendered status diagnostic, matching the fixed-buffer
/// contract of the wire-facing tooling this crate interoperates with
pub const STATUS_BUF_LEN: usize = 1024;

/// A PKIStatusInfo as carried in CertResponse, RevRepContent, and error
/// bodies: status code, optional failure-info bits, optional free text
///
/// The status slot holds the raw wire code; conversion into the closed
/// [`PkiStatus`] enumeration happens on access, so a malformed or unknown
/// value surfaces as a typed error exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PkiStatusInfo {
    status: Option<i32>,
    fail_info: Option<FailInfo>,
    status_strings: Vec<String>,
}

impl PkiStatusInfo {
    /// Build a status info for an outgoing message (certConf, error)
    pub fn new(status: PkiStatus, fail_info: FailInfo, text: Option<&str>) -> Self {
        Self {
            status: Some(status.code()),
            fail_info: (!fail_info.is_empty()).then_some(fail_info),
            status_strings: text.map(|t| vec![t.to_string()]).unwrap_or_default(),
        }
    }

    /// Build from raw wire fields, as a decoder would produce them
    pub fn from_raw(
        status: Option<i32>,
        fail_info: Option<FailInfo>,
        status_strings: Vec<String>,
    ) -> Self {
        Self {
            status,
            fail_info,
            status_strings,
        }
    }

    /// The status value
    ///
    /// Fails with `Malformed` when the mandatory status field is absent and
    /// with `UnknownPkiStatus` when the code lies outside the closed set.
    pub fn status(&self) -> Result<PkiStatus> {
        let code = self
            .status
            .ok_or_else(|| CmpError::Malformed("PKIStatusInfo without status".into()))?;
        PkiStatus::from_code(code)
    }

    /// The raw status code, if present
    pub fn raw_status(&self) -> Option<i32> {
        self.status
    }

    /// The failure-info bits; empty when the field is absent
    pub fn failure_bits(&self) -> FailInfo {
        self.fail_info.unwrap_or_default()
    }

    /// The free-text status strings in wire order
    pub fn status_strings(&self) -> &[String] {
        &self.status_strings
    }
}

impl CmpContext {
    /// Save status, failure bits, and a fresh copy of the status strings
    /// from the given PKIStatusInfo into this context
    ///
    /// The save is atomic: on failure (absent or unknown status value) the
    /// previously stored status information is left untouched.
    pub fn save_status_info(&mut self, si: &PkiStatusInfo) -> Result<()> {
        let status = si.status()?;
        self.status = Some(status);
        self.fail_info = si.failure_bits();
        self.status_strings = si.status_strings().to_vec();
        Ok(())
    }

    /// Render the stored status information as one diagnostic line
    ///
    /// Format: `PKIStatus: <name>[; PKIFailureInfo: f1, f2, …]
    /// [; <no failure info>][; StatusString(s): "s1", "s2", …]`.
    /// Returns `None` when no status has been saved yet or when the
    /// rendering would exceed [`STATUS_BUF_LEN`].
    pub fn render_status(&self) -> Option<String> {
        let status = self.status?;
        let mut out = format!("PKIStatus: {}", status.name());

        let names = self.fail_info.names();
        if !names.is_empty() {
            out.push_str("; PKIFailureInfo: ");
            out.push_str(&names.join(", "));
        } else if status != PkiStatus::Accepted && status != PkiStatus::GrantedWithMods {
            out.push_str("; <no failure info>");
        }

        if !self.status_strings.is_empty() {
            if self.status_strings.len() > 1 {
                out.push_str("; StatusStrings: ");
            } else {
                out.push_str("; StatusString: ");
            }
            let quoted: Vec<String> = self
                .status_strings
                .iter()
                .map(|s| format!("\"{s}\""))
                .collect();
            out.push_str(&quoted.join(", "));
        }

        if out.len() > STATUS_BUF_LEN {
            return None;
        }
        Some(out)
    }
}
