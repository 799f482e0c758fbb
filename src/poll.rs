//! Polling for a delayed certificate response
//!
//! After a 'waiting' PKIStatus the server is polled with pollReq until a
//! pollRep stops asking for more patience and an ip/cp/kup arrives. The
//! server-requested checkAfter delay is honored, clamped so the total
//! transaction deadline still permits one final poll.

use std::time::Duration;
use tracing::info;

use crate::context::CmpContext;
use crate::error::{CmpError, Result};
use crate::msg::PkiMessage;
use crate::types::BodyType;

/// Expected maximum time per message round trip, reserved from the
/// remaining transaction budget before sleeping
const ROUND_TRIP_RESERVE_SECS: i64 = 5;

/// How the poll loop treats a pollRep's checkAfter delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollMode {
    /// Sleep the requested time and poll again
    Sleep,
    /// Hand the delay back to the caller, who drives the next poll
    NoWait,
}

/// Result of one poll invocation
#[derive(Debug)]
pub(crate) enum PollOutcome {
    /// The server answered with the real response (ip/cp/kup)
    Done(PkiMessage),
    /// Still waiting; poll again after the given number of seconds
    Waiting(i64),
}

impl CmpContext {
    /// Poll for the response to the request with id `cert_req_id`
    ///
    /// In [`PollMode::Sleep`] the loop only returns with
    /// [`PollOutcome::Done`] or an error; in [`PollMode::NoWait`] the
    /// first pollRep yields [`PollOutcome::Waiting`] immediately.
    pub(crate) fn poll_for_response(
        &mut self,
        mode: PollMode,
        cert_req_id: i64,
    ) -> Result<PollOutcome> {
        info!("received 'waiting' PKIStatus, starting to poll for response");
        loop {
            let preq = self.build_poll_req(cert_req_id)?;
            let prep = self.send_receive_check(&preq, BodyType::PollRep)?;

            let Some(content) = prep.poll_rep() else {
                // any other body type has been rejected upstream
                info!("received ip/cp/kup after polling");
                return Ok(PollOutcome::Done(prep));
            };

            if content.entries.len() > 1 {
                return Err(CmpError::MultipleResponsesNotSupported);
            }
            let entry = content.entry_for(cert_req_id).ok_or_else(|| {
                CmpError::Malformed("pollRep without entry for the polled certReqId".into())
            })?;

            let mut check_after = entry.check_after;
            let bound = match mode {
                PollMode::Sleep => (u64::MAX / 1000) as i64,
                PollMode::NoWait => i32::MAX as i64,
            };
            if check_after < 0 || check_after > bound {
                return Err(CmpError::BadCheckAfter(check_after));
            }

            if let Some(end) = self.end_time {
                let time_left = (end - self.now()).num_seconds() - ROUND_TRIP_RESERVE_SECS;
                if time_left <= 0 {
                    return Err(CmpError::TotalTimeout);
                }
                if time_left < check_after {
                    // poll one last time just when the timeout is reached
                    check_after = time_left;
                }
            }

            if entry.reason.is_empty() {
                info!("received polling response; checkAfter = {check_after} seconds");
            } else {
                info!(
                    "received polling response with reason = '{}'; checkAfter = {check_after} seconds",
                    entry.reason.join(", ")
                );
            }

            match mode {
                PollMode::Sleep => self.clock.sleep(Duration::from_secs(check_after as u64)),
                PollMode::NoWait => return Ok(PollOutcome::Waiting(check_after)),
            }
        }
    }
}
