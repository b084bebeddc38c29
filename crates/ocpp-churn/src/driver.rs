//! Offline responder loop over newline-delimited frames.
//!
//! Each input line is one wire frame as the central system would send it.
//! Inbound calls are answered through the action table of the chosen subtype
//! and the reply frame is written as one output line. Results, errors and
//! undecodable lines produce no output.

use crate::actions::{respond_to_call, ActionRegistry, ReplyOutcome};
use crate::codec::decode;
use crate::model::{Envelope, ProtocolSubtype};
use crate::runner::{RunnerError, RunnerResult};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};

/// Counts of what the responder saw.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponderSummary {
    pub lines: u64,
    pub replies: u64,
    pub unimplemented: u64,
    pub handler_faults: u64,
    /// Results and errors, which need no reply.
    pub ignored: u64,
    pub decode_failures: u64,
}

/// Answer frames from stdin on stdout.
pub fn run_responder(subtype: ProtocolSubtype) -> RunnerResult<ResponderSummary> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let registry = ActionRegistry::for_subtype(subtype);
    run_responder_with_io(&registry, stdin.lock(), stdout.lock())
}

pub fn run_responder_with_io<R, W>(
    registry: &ActionRegistry,
    input: R,
    mut output: W,
) -> RunnerResult<ResponderSummary>
where
    R: BufRead,
    W: Write,
{
    let mut summary = ResponderSummary::default();
    for (number, line) in input.lines().enumerate() {
        let line =
            line.map_err(|err| RunnerError::io("E_IO", "failed to read responder input", err))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        summary.lines += 1;

        let envelope = match decode(line) {
            Ok(envelope) => envelope,
            Err(failure) => {
                summary.decode_failures += 1;
                tracing::warn!(line = number + 1, %failure, "skipping undecodable frame");
                continue;
            }
        };
        let kind = envelope.kind();
        let Envelope::Call {
            request_id,
            action,
            payload,
        } = envelope
        else {
            summary.ignored += 1;
            tracing::debug!(line = number + 1, ?kind, "no reply needed");
            continue;
        };

        let reply = respond_to_call(registry, &request_id, &action, &payload);
        match reply.outcome {
            ReplyOutcome::Handled => {}
            ReplyOutcome::Unimplemented => summary.unimplemented += 1,
            ReplyOutcome::Faulted => summary.handler_faults += 1,
        }
        emit_reply(&mut output, &reply.frame)?;
        summary.replies += 1;
    }
    Ok(summary)
}

fn emit_reply<W: Write>(output: &mut W, frame: &str) -> RunnerResult<()> {
    writeln!(output, "{frame}")
        .and_then(|()| output.flush())
        .map_err(|err| RunnerError::io("E_IO", "failed to write responder output", err))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn respond(subtype: ProtocolSubtype, input: &str) -> (ResponderSummary, Vec<String>) {
        let registry = ActionRegistry::for_subtype(subtype);
        let mut output = Vec::new();
        let summary = run_responder_with_io(&registry, Cursor::new(input), &mut output).unwrap();
        let lines = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect();
        (summary, lines)
    }

    #[test]
    fn answers_each_call_in_order() {
        let input = concat!(
            r#"[2,"a1","Reset",{"type":"Soft"}]"#,
            "\n",
            r#"[2,"a2","Foo",{}]"#,
            "\n",
            r#"[3,"a3",{}]"#,
            "\n\n",
            "garbage\n",
        );
        let (summary, lines) = respond(ProtocolSubtype::Ocpp16, input);
        assert_eq!(
            lines,
            vec![
                r#"[3,"a1",{"status":"Accepted"}]"#.to_string(),
                r#"[4,"a2","NotImplemented","Action Foo not implemented",{}]"#.to_string(),
            ]
        );
        assert_eq!(
            summary,
            ResponderSummary {
                lines: 4,
                replies: 2,
                unimplemented: 1,
                handler_faults: 0,
                ignored: 1,
                decode_failures: 1,
            }
        );
    }

    #[test]
    fn subtype_selects_the_action_table() {
        let input = concat!(r#"[2,"g1","GetVariables",{"getVariableData":[]}]"#, "\n");
        let (summary, v16) = respond(ProtocolSubtype::Ocpp16, input);
        assert!(v16[0].starts_with(r#"[4,"g1","NotImplemented""#));
        assert_eq!(summary.unimplemented, 1);
        let (_, v21) = respond(ProtocolSubtype::Ocpp21, input);
        assert_eq!(v21, vec![r#"[3,"g1",{"getVariableResult":[]}]"#.to_string()]);
    }

    #[test]
    fn handler_fault_is_answered_with_internal_error() {
        let input = concat!(r#"[2,"d1","DataTransfer",{}]"#, "\n");
        let (summary, lines) = respond(ProtocolSubtype::Ocpp201, input);
        assert_eq!(summary.handler_faults, 1);
        assert_eq!(
            lines,
            vec![r#"[4,"d1","InternalError","Failed to process DataTransfer",{}]"#.to_string()]
        );
    }
}
