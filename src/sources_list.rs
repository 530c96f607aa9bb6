//! Parsing of one-line-style APT `sources.list` entries.
//!
//! Handles lines of the form
//! `<type> [<opts>]? <mirror> <suite> <components...>`, the same grammar the
//! auth bootstrap scans for credentials and `lp-in-release inject` rewrites
//! to embed `by-hash`/`inrelease-path` options.

use nom::{
    bytes::complete::{is_not, tag, take_while1},
    character::complete::{char, space0, space1},
    combinator::opt,
    multi::separated_list1,
    sequence::delimited,
    IResult, Parser,
};

/// A parsed `deb`/`deb-src` line, retaining enough structure to re-emit it
/// with a modified option bracket while leaving everything else untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub repo_type: String,
    pub options: Vec<String>,
    pub mirror: String,
    pub suite: String,
    pub components: Vec<String>,
}

fn repo_type(input: &str) -> IResult<&str, &str> {
    nom::branch::alt((tag("deb-src"), tag("deb"))).parse(input)
}

fn option_bracket(input: &str) -> IResult<&str, Vec<String>> {
    let (input, inner) = delimited(char('['), is_not("]"), char(']')).parse(input)?;
    Ok((
        input,
        inner
            .split_whitespace()
            .map(|s| s.to_string())
            .collect(),
    ))
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

fn parse_line(input: &str) -> IResult<&str, SourceLine> {
    let (input, repo_type) = repo_type(input)?;
    let (input, _) = space1(input)?;
    let (input, options) = opt(|i| {
        let (i, opts) = option_bracket(i)?;
        let (i, _) = space0(i)?;
        Ok((i, opts))
    })
    .parse(input)?;
    let (input, mirror) = token(input)?;
    let (input, _) = space1(input)?;
    let (input, suite) = token(input)?;
    let (input, _) = space0(input)?;
    let (input, components) = separated_list1(space1, token).parse(input)?;

    Ok((
        input,
        SourceLine {
            repo_type: repo_type.to_string(),
            options: options.unwrap_or_default(),
            mirror: mirror.to_string(),
            suite: suite.to_string(),
            components: components.into_iter().map(|s| s.to_string()).collect(),
        },
    ))
}

/// Parse a single `sources.list` line, ignoring comments and blank lines.
///
/// Returns `None` for anything that is not a `deb`/`deb-src` entry with a
/// scheme in `{http, https, ftp}` — such lines pass through untouched by
/// callers.
pub fn parse_source_line(line: &str) -> Option<SourceLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (_, parsed) = parse_line(trimmed).ok()?;
    if !["http://", "https://", "ftp://"]
        .iter()
        .any(|scheme| parsed.mirror.starts_with(scheme))
    {
        return None;
    }
    Some(parsed)
}

/// Re-render a [`SourceLine`] with a possibly-modified option set, preserving
/// the original token order and spacing conventions.
pub fn render_source_line(line: &SourceLine) -> String {
    let mut out = String::new();
    out.push_str(&line.repo_type);
    out.push(' ');
    if !line.options.is_empty() {
        out.push('[');
        out.push_str(&line.options.join(" "));
        out.push(']');
        out.push(' ');
    }
    out.push_str(&line.mirror);
    out.push(' ');
    out.push_str(&line.suite);
    for component in &line.components {
        out.push(' ');
        out.push_str(component);
    }
    out
}

/// Merge `by-hash=yes` and `inrelease-path=by-hash/SHA256/<hash>` into a
/// line's option bracket, replacing any prior values for those two keys.
pub fn with_by_hash_options(line: &SourceLine, hash: &str) -> SourceLine {
    let mut options: Vec<String> = line
        .options
        .iter()
        .filter(|opt| {
            !opt.starts_with("by-hash=") && !opt.starts_with("inrelease-path=")
        })
        .cloned()
        .collect();
    options.push("by-hash=yes".to_string());
    options.push(format!("inrelease-path=by-hash/SHA256/{hash}"));

    SourceLine {
        options,
        ..line.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_line() {
        let parsed = parse_source_line("deb http://a.example/ubuntu jammy main").unwrap();
        assert_eq!(parsed.repo_type, "deb");
        assert_eq!(parsed.mirror, "http://a.example/ubuntu");
        assert_eq!(parsed.suite, "jammy");
        assert_eq!(parsed.components, vec!["main"]);
        assert!(parsed.options.is_empty());
    }

    #[test]
    fn parses_line_with_options() {
        let parsed =
            parse_source_line("deb [arch=amd64] http://a.example/ubuntu jammy main universe")
                .unwrap();
        assert_eq!(parsed.options, vec!["arch=amd64"]);
        assert_eq!(parsed.components, vec!["main", "universe"]);
    }

    #[test]
    fn non_matching_line_is_none() {
        assert!(parse_source_line("# a comment").is_none());
        assert!(parse_source_line("").is_none());
    }

    #[test]
    fn injects_by_hash_options() {
        let parsed = parse_source_line("deb http://a.example/ubuntu jammy main").unwrap();
        let injected = with_by_hash_options(&parsed, "deadbeef");
        assert_eq!(
            render_source_line(&injected),
            "deb [by-hash=yes inrelease-path=by-hash/SHA256/deadbeef] http://a.example/ubuntu jammy main"
        );
    }

    #[test]
    fn second_injection_is_idempotent() {
        let parsed = parse_source_line("deb http://a.example/ubuntu jammy main").unwrap();
        let once = with_by_hash_options(&parsed, "deadbeef");
        let twice = with_by_hash_options(&once, "deadbeef");
        assert_eq!(render_source_line(&once), render_source_line(&twice));
    }
}
