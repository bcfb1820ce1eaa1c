//! `bitzel hash`

use crate::error::BitzelResult;
use crate::workspace::Workspace;
use convenient_fingerprint::{HashCode, PathKind};
use serde::Serialize;

/// Separates an archive path from a member name
pub const MEMBER_SEPARATOR: char = '!';

#[derive(Debug, Serialize)]
struct HashLine<'a> {
    path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    member: Option<&'a str>,
    hash: HashCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<PathKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

/// Split `archive!member`; a bare path has no member
#[must_use]
pub fn split_member(target: &str) -> (&str, Option<&str>) {
    match target.split_once(MEMBER_SEPARATOR) {
        Some((archive, member)) if !archive.is_empty() && !member.is_empty() => {
            (archive, Some(member))
        }
        _ => (target, None),
    }
}

/// Print the fingerprint of each path
///
/// # Errors
///
/// The first path that cannot be fingerprinted
pub fn execute(workspace: &Workspace, paths: &[String], json: bool) -> BitzelResult<()> {
    let fingerprints = workspace.fingerprints();

    for target in paths {
        let (path, member) = split_member(target);
        let absolute = workspace.resolve(path);

        let line = match member {
            Some(member) => HashLine {
                path,
                member: Some(member),
                hash: fingerprints.get_for_archive_member(&absolute, member)?,
                kind: None,
                size: None,
            },
            None => {
                let entry = fingerprints.entry(&absolute)?;
                HashLine {
                    path,
                    member: None,
                    hash: entry.hash,
                    kind: Some(entry.kind),
                    size: Some(entry.size),
                }
            }
        };

        if json {
            println!("{}", serde_json::to_string(&line)?);
        } else {
            match (line.kind, line.size) {
                (Some(kind), Some(size)) => {
                    println!("{}  {:?}  {:>10}  {}", line.hash, kind, size, path);
                }
                _ => println!("{}  member  {:>10}  {}", line.hash, "-", target),
            }
        }
    }
    Ok(())
}
