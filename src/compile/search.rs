//! Locates template delimiters in the source.
//!
//! Delimiters are fixed: `{{ }}` for expressions, `{% %}` for blocks and
//! `{# #}` for comments, each optionally carrying a `-` trim marker on the
//! inner side.

/// A delimiter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    BeginExpr,
    EndExpr,
    BeginBlock,
    EndBlock,
    BeginComment,
    EndComment,
}

/// A delimiter found in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub kind: Kind,
    /// Whether the delimiter carries a trim marker.
    pub trim: bool,
    pub start: usize,
    pub end: usize,
}

/// Finds the first begin delimiter at or after `at`.
pub fn find_begin(source: &str, at: usize) -> Option<Match> {
    let bytes = source.as_bytes();
    let mut i = at;
    while let Some(d) = bytes.get(i..)?.iter().position(|&b| b == b'{') {
        let j = i + d;
        let kind = match bytes.get(j + 1) {
            Some(b'{') => Kind::BeginExpr,
            Some(b'%') => Kind::BeginBlock,
            Some(b'#') => Kind::BeginComment,
            _ => {
                i = j + 1;
                continue;
            }
        };
        let trim = bytes.get(j + 2) == Some(&b'-');
        return Some(Match {
            kind,
            trim,
            start: j,
            end: j + 2 + usize::from(trim),
        });
    }
    None
}

/// Returns the begin delimiter starting exactly at `at`, if any.
pub fn begin_at(source: &str, at: usize) -> Option<Match> {
    find_begin(source, at).filter(|m| m.start == at)
}

/// Returns the end delimiter starting exactly at `at`, if any.
pub fn end_at(source: &str, at: usize) -> Option<Match> {
    let rest = source.get(at..)?;
    let (trim, rest) = match rest.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, rest),
    };
    let kind = if rest.starts_with("}}") {
        Kind::EndExpr
    } else if rest.starts_with("%}") {
        Kind::EndBlock
    } else if rest.starts_with("#}") {
        Kind::EndComment
    } else {
        return None;
    };
    Some(Match {
        kind,
        trim,
        start: at,
        end: at + 2 + usize::from(trim),
    })
}

/// Finds the first end comment delimiter at or after `at`.
pub fn find_end_comment(source: &str, at: usize) -> Option<Match> {
    let j = at + source.get(at..)?.find("#}")?;
    let trim = j > at && source.as_bytes()[j - 1] == b'-';
    Some(Match {
        kind: Kind::EndComment,
        trim,
        start: if trim { j - 1 } else { j },
        end: j + 2,
    })
}

/// Matches a block tag consisting of a single keyword, e.g. `{% raw %}`,
/// where `at` points just after the begin delimiter.
///
/// Returns whether the tag ends with a trim marker and the end offset.
pub fn keyword_tag(source: &str, at: usize, keyword: &str) -> Option<(bool, usize)> {
    let rest = source.get(at..)?;
    let trimmed = rest.trim_start();
    let after = trimmed.strip_prefix(keyword)?;
    let tail = after.trim_start();
    if tail.len() == after.len() && !(after.starts_with('-') || after.starts_with('%')) {
        // The keyword is only a prefix of a longer identifier.
        return None;
    }
    let m = end_at(source, source.len() - tail.len())?;
    match m.kind {
        Kind::EndBlock => Some((m.trim, m.end)),
        _ => None,
    }
}
