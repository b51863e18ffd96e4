//! Regular-expression collaborator interface.
//!
//! The runtime does not implement a regex engine. It consumes one through
//! [`RegExpProxy`]: `compile` turns source + flags into an opaque handle,
//! `exec` runs a compiled pattern from an index. The runtime side wraps
//! handles into script-visible `RegExp` objects (class tag, `source`,
//! `flags`, `lastIndex`) and drives `exec` from the `NewRegExp` opcode and
//! the installed natives.
//!
//! [`FancyRegexProxy`] is the in-crate adapter: `fancy-regex` supports the
//! backreferences and lookaround that ECMAScript patterns use.

use serde::{Deserialize, Serialize};

use crate::{heap::HeapId, intern::StringId};

/// Opaque handle to a compiled pattern, issued by a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegExpHandle(pub u32);

/// One successful match: overall span plus capture spans, all in byte
/// offsets of the input.
#[derive(Debug, Clone)]
pub struct RegExpMatch {
    pub start: usize,
    pub end: usize,
    /// Capture groups 1..; `None` for groups that did not participate.
    pub captures: Vec<Option<(usize, usize)>>,
}

/// Parsed ECMAScript regex flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegExpFlags {
    pub global: bool,
    pub ignore_case: bool,
    pub multiline: bool,
    pub dot_all: bool,
    pub unicode: bool,
    pub sticky: bool,
}

impl RegExpFlags {
    /// Parses a flags string; `None` on duplicate or unknown flags.
    pub fn parse(s: &str) -> Option<Self> {
        let mut flags = Self::default();
        for c in s.chars() {
            let field = match c {
                'g' => &mut flags.global,
                'i' => &mut flags.ignore_case,
                'm' => &mut flags.multiline,
                's' => &mut flags.dot_all,
                'u' => &mut flags.unicode,
                'y' => &mut flags.sticky,
                _ => return None,
            };
            if *field {
                return None;
            }
            *field = true;
        }
        Some(flags)
    }
}

/// Engine seam for regular expressions.
pub trait RegExpProxy: std::fmt::Debug {
    /// Compiles a pattern; the error string surfaces as a `SyntaxError`.
    fn compile(&mut self, source: &str, flags: RegExpFlags) -> Result<RegExpHandle, String>;

    /// Executes a compiled pattern against `input` starting at byte
    /// `index`. Returns `None` when nothing matches.
    fn exec(&mut self, handle: RegExpHandle, input: &str, index: usize) -> Option<RegExpMatch>;
}

/// Internal slots of a `RegExp` object: the proxy handle plus the
/// script-visible metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RegExpData {
    pub handle: RegExpHandle,
    pub source: StringId,
    pub flags: RegExpFlags,
    /// `lastIndex`, advanced by global/sticky matching.
    pub last_index: u64,
}

impl RegExpData {
    pub fn trace(&self, _push: &mut impl FnMut(HeapId)) {
        // Handle and metadata hold no heap references.
    }
}

/// Adapter backed by `fancy-regex`.
///
/// Flag translation: `i`/`m`/`s` become inline flags; `g`/`y` only affect
/// how the runtime advances `lastIndex`, so they compile to nothing.
#[derive(Debug, Default)]
pub struct FancyRegexProxy {
    patterns: Vec<fancy_regex::Regex>,
}

impl FancyRegexProxy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegExpProxy for FancyRegexProxy {
    fn compile(&mut self, source: &str, flags: RegExpFlags) -> Result<RegExpHandle, String> {
        let mut inline = String::new();
        if flags.ignore_case {
            inline.push('i');
        }
        if flags.multiline {
            inline.push('m');
        }
        if flags.dot_all {
            inline.push('s');
        }
        let translated = if inline.is_empty() {
            source.to_owned()
        } else {
            format!("(?{inline}){source}")
        };
        let regex = fancy_regex::Regex::new(&translated).map_err(|e| e.to_string())?;
        let handle = RegExpHandle(u32::try_from(self.patterns.len()).expect("pattern table overflow"));
        self.patterns.push(regex);
        Ok(handle)
    }

    fn exec(&mut self, handle: RegExpHandle, input: &str, index: usize) -> Option<RegExpMatch> {
        if index > input.len() {
            return None;
        }
        let regex = self.patterns.get(handle.0 as usize)?;
        let captures = regex.captures_from_pos(input, index).ok().flatten()?;
        let overall = captures.get(0).expect("group 0 always participates");
        let groups = (1..captures.len())
            .map(|i| captures.get(i).map(|m| (m.start(), m.end())))
            .collect();
        Some(RegExpMatch {
            start: overall.start(),
            end: overall.end(),
            captures: groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_and_reject_duplicates() {
        let flags = RegExpFlags::parse("gi").unwrap();
        assert!(flags.global && flags.ignore_case);
        assert!(!flags.sticky);
        assert!(RegExpFlags::parse("gg").is_none());
        assert!(RegExpFlags::parse("x").is_none());
    }

    #[test]
    fn adapter_compiles_and_matches() {
        let mut proxy = FancyRegexProxy::new();
        let handle = proxy.compile("a(b+)c", RegExpFlags::default()).unwrap();
        let m = proxy.exec(handle, "xxabbbc", 0).unwrap();
        assert_eq!((m.start, m.end), (2, 7));
        assert_eq!(m.captures, vec![Some((3, 6))]);
        assert!(proxy.exec(handle, "nope", 0).is_none());
    }

    #[test]
    fn adapter_supports_backreferences() {
        let mut proxy = FancyRegexProxy::new();
        let handle = proxy.compile(r"(\w+) \1", RegExpFlags::default()).unwrap();
        assert!(proxy.exec(handle, "hey hey", 0).is_some());
        assert!(proxy.exec(handle, "hey you", 0).is_none());
    }

    #[test]
    fn ignore_case_flag_translates() {
        let mut proxy = FancyRegexProxy::new();
        let flags = RegExpFlags::parse("i").unwrap();
        let handle = proxy.compile("abc", flags).unwrap();
        assert!(proxy.exec(handle, "xABC", 0).is_some());
    }
}
