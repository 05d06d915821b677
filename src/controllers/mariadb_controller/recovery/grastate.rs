// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::controllers::mariadb_controller::recovery::RecoveryError;
use crate::controllers::mariadb_controller::trusted::exec_types::GaleraState;
use regex::Regex;

// grastate.dat as written by the galera provider on shutdown:
//
//   # GALERA saved state
//   version: 2.1
//   uuid:    5ee99582-bb8d-11e2-b8e3-23de375c1d30
//   seqno:   8204503945773
//   safe_to_bootstrap: 0

fn capture(content: &str, pattern: &str, field: &'static str) -> Result<String, RecoveryError> {
    let re = Regex::new(pattern).map_err(|_| RecoveryError::MalformedStateFile(field))?;
    re.captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(RecoveryError::MalformedStateFile(field))
}

pub fn parse_grastate(content: &str) -> Result<GaleraState, RecoveryError> {
    let version = capture(content, r"(?m)^version:[ \t]*([0-9.]+)[ \t]*$", "version")?;
    let uuid = capture(content, r"(?m)^uuid:[ \t]*([0-9A-Fa-f-]+)[ \t]*$", "uuid")?;
    let seq_no = capture(content, r"(?m)^seqno:[ \t]*(-?[0-9]+)[ \t]*$", "seqno")?
        .parse::<i64>()
        .map_err(|_| RecoveryError::MalformedStateFile("seqno"))?;
    // Providers older than 3.19 do not write the flag; they never refuse to bootstrap.
    let safe_to_bootstrap = match capture(content, r"(?m)^safe_to_bootstrap:[ \t]*([01])[ \t]*$", "safe_to_bootstrap") {
        Ok(flag) => flag == "1",
        Err(_) => true,
    };
    Ok(GaleraState {
        version,
        uuid,
        seq_no,
        safe_to_bootstrap,
    })
}

/// Rewrites the flag to 1 and leaves every other line as it was.
pub fn mark_safe_to_bootstrap(content: &str) -> String {
    let flag = Regex::new(r"(?m)^safe_to_bootstrap:[ \t]*[01][ \t]*$").ok();
    match flag {
        Some(re) if re.is_match(content) => re.replace(content, "safe_to_bootstrap: 1").into_owned(),
        _ => {
            let mut rewritten = content.to_string();
            if !rewritten.is_empty() && !rewritten.ends_with('\n') {
                rewritten.push('\n');
            }
            rewritten.push_str("safe_to_bootstrap: 1\n");
            rewritten
        }
    }
}

/// Extracts `uuid:seqno` from the log of `mysqld --wsrep-recover`, e.g.
/// `[Note] WSREP: Recovered position: 5ee99582-bb8d-11e2-b8e3-23de375c1d30:1234`.
pub fn parse_recovered_position(output: &str) -> Option<(String, i64)> {
    let re = Regex::new(r"WSREP: Recovered position:[ \t]*([0-9A-Fa-f-]+):(-?[0-9]+)").ok()?;
    let caps = re.captures_iter(output).last()?;
    let uuid = caps.get(1)?.as_str().to_string();
    let seq_no = caps.get(2)?.as_str().parse::<i64>().ok()?;
    Some((uuid, seq_no))
}
