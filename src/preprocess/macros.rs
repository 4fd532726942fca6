//! Macro definitions, expansion, and the preprocessor token scanner.

use std::collections::{HashMap, HashSet};

/// A preprocessor token. The scanner is deliberately coarse: the real
/// lexical grammar lives in the parser, the preprocessor only needs to
/// distinguish identifiers, numbers and punctuation.
#[derive(Debug, Clone, PartialEq)]
pub enum PpToken {
    Ident(String),
    Number(String),
    Punct(&'static str),
    /// Anything the scanner does not classify (stray characters survive
    /// verbatim so the parser can report them).
    Other(char),
}

impl PpToken {
    pub fn text(&self) -> String {
        match self {
            PpToken::Ident(s) | PpToken::Number(s) => s.clone(),
            PpToken::Punct(p) => (*p).to_string(),
            PpToken::Other(c) => c.to_string(),
        }
    }
}

/// Multi-character punctuators, longest first so the scanner is greedy.
const PUNCTS: &[&str] = &[
    "<<=", ">>=", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "^^", "+=", "-=", "*=", "/=",
    "%=", "&=", "|=", "^=", "++", "--", "(", ")", "[", "]", "{", "}", ",", ".", ";", "?", ":",
    "+", "-", "*", "/", "%", "<", ">", "!", "~", "&", "|", "^", "=",
];

/// Scan a directive line or source line into preprocessor tokens.
pub fn scan(text: &str) -> Vec<PpToken> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    'outer: while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if b.is_ascii_alphabetic() || b == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push(PpToken::Ident(text[start..i].to_string()));
            continue;
        }
        if b.is_ascii_digit() || (b == b'.' && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit())
        {
            let start = i;
            // Digits, hex prefix, exponents, suffixes. Coarse on purpose.
            while i < bytes.len() {
                let b = bytes[i];
                let is_num = b.is_ascii_alphanumeric() || b == b'.';
                let is_exp_sign = (b == b'+' || b == b'-')
                    && i > start
                    && matches!(bytes[i - 1], b'e' | b'E' | b'p' | b'P');
                if is_num || is_exp_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(PpToken::Number(text[start..i].to_string()));
            continue;
        }
        for p in PUNCTS {
            if text[i..].starts_with(p) {
                tokens.push(PpToken::Punct(p));
                i += p.len();
                continue 'outer;
            }
        }
        // Unclassified, possibly multi-byte. The ASCII branches above never
        // step into a character, so `i` is always on a boundary here; take
        // the whole character to keep it that way.
        let Some(c) = text[i..].chars().next() else {
            break;
        };
        tokens.push(PpToken::Other(c));
        i += c.len_utf8();
    }
    tokens
}

/// Rejoin tokens into source text. A single space between tokens is always
/// safe in GLSL.
pub fn unscan(tokens: &[PpToken]) -> String {
    tokens
        .iter()
        .map(PpToken::text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A macro definition.
#[derive(Debug, Clone)]
pub struct MacroDef {
    /// `None` for object-like macros, parameter names for function-like.
    pub params: Option<Vec<String>>,
    /// Replacement list.
    pub body: Vec<PpToken>,
}

/// Table of live macro definitions.
#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, MacroDef>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, def: MacroDef) {
        self.macros.insert(name.into(), def);
    }

    pub fn define_object(&mut self, name: impl Into<String>, replacement: &str) {
        self.define(
            name,
            MacroDef {
                params: None,
                body: scan(replacement),
            },
        );
    }

    pub fn undef(&mut self, name: &str) {
        self.macros.remove(name);
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&MacroDef> {
        self.macros.get(name)
    }

    /// Quick check used to pass untouched lines through verbatim.
    pub fn mentions_macro(&self, line: &str) -> bool {
        if self.macros.is_empty() {
            return false;
        }
        ident_candidates(line).any(|ident| self.macros.contains_key(ident))
    }

    /// Fully macro-expand a token sequence.
    pub fn expand(&self, tokens: &[PpToken]) -> Vec<PpToken> {
        let mut active = HashSet::new();
        self.expand_inner(tokens, &mut active)
    }

    fn expand_inner(&self, tokens: &[PpToken], active: &mut HashSet<String>) -> Vec<PpToken> {
        let mut out = Vec::with_capacity(tokens.len());
        let mut i = 0;

        while i < tokens.len() {
            let tok = &tokens[i];
            let name = match tok {
                PpToken::Ident(name) if !active.contains(name) => name.clone(),
                _ => {
                    out.push(tok.clone());
                    i += 1;
                    continue;
                }
            };
            let Some(def) = self.macros.get(&name) else {
                out.push(tok.clone());
                i += 1;
                continue;
            };

            match &def.params {
                None => {
                    active.insert(name.clone());
                    out.extend(self.expand_inner(&def.body, active));
                    active.remove(&name);
                    i += 1;
                }
                Some(params) => {
                    // Function-like macro without a call is left alone.
                    if tokens.get(i + 1) != Some(&PpToken::Punct("(")) {
                        out.push(tok.clone());
                        i += 1;
                        continue;
                    }
                    let (args, consumed) = match collect_args(&tokens[i + 2..]) {
                        Some(v) => v,
                        None => {
                            // Unbalanced call; emit as-is and let the parser
                            // complain about whatever is left.
                            out.push(tok.clone());
                            i += 1;
                            continue;
                        }
                    };

                    // Arguments are expanded before substitution.
                    let expanded_args: Vec<Vec<PpToken>> = args
                        .iter()
                        .map(|arg| self.expand_inner(arg, active))
                        .collect();

                    let substituted = substitute(&def.body, params, &expanded_args);
                    active.insert(name.clone());
                    out.extend(self.expand_inner(&substituted, active));
                    active.remove(&name);

                    // Skip name, '(', args, ')'.
                    i += 2 + consumed + 1;
                }
            }
        }
        out
    }
}

/// Collect call arguments starting just after the opening paren. Returns the
/// argument token lists and the number of tokens before the closing paren.
fn collect_args(tokens: &[PpToken]) -> Option<(Vec<Vec<PpToken>>, usize)> {
    let mut args: Vec<Vec<PpToken>> = Vec::new();
    let mut current: Vec<PpToken> = Vec::new();
    let mut depth = 0usize;

    for (i, tok) in tokens.iter().enumerate() {
        match tok {
            PpToken::Punct("(") => {
                depth += 1;
                current.push(tok.clone());
            }
            PpToken::Punct(")") => {
                if depth == 0 {
                    // Zero-argument calls produce one empty arg; drop it.
                    if !(args.is_empty() && current.is_empty()) {
                        args.push(current);
                    }
                    return Some((args, i));
                }
                depth -= 1;
                current.push(tok.clone());
            }
            PpToken::Punct(",") if depth == 0 => args.push(std::mem::take(&mut current)),
            _ => current.push(tok.clone()),
        }
    }
    None
}

/// Replace parameter occurrences in a macro body with argument tokens.
fn substitute(body: &[PpToken], params: &[String], args: &[Vec<PpToken>]) -> Vec<PpToken> {
    let mut out = Vec::with_capacity(body.len());
    for tok in body {
        if let PpToken::Ident(name) = tok {
            if let Some(pos) = params.iter().position(|p| p == name) {
                out.extend(args.get(pos).cloned().unwrap_or_default());
                continue;
            }
        }
        out.push(tok.clone());
    }
    out
}

/// Iterate identifier-shaped substrings of a line.
fn ident_candidates(line: &str) -> impl Iterator<Item = &str> {
    line.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|s| !s.is_empty() && !s.starts_with(|c: char| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_str(table: &MacroTable, text: &str) -> String {
        unscan(&table.expand(&scan(text)))
    }

    #[test]
    fn test_scan_basic() {
        let toks = scan("vec3 pos = a*2.0e-1;");
        assert_eq!(toks[0], PpToken::Ident("vec3".into()));
        assert_eq!(toks[3], PpToken::Ident("a".into()));
        assert_eq!(toks[4], PpToken::Punct("*"));
        assert_eq!(toks[5], PpToken::Number("2.0e-1".into()));
    }

    #[test]
    fn test_object_macro() {
        let mut table = MacroTable::new();
        table.define_object("COUNT", "4");
        assert_eq!(expand_str(&table, "float v[COUNT];"), "float v [ 4 ] ;");
    }

    #[test]
    fn test_function_macro() {
        let mut table = MacroTable::new();
        table.define(
            "SQ",
            MacroDef {
                params: Some(vec!["x".into()]),
                body: scan("((x)*(x))"),
            },
        );
        assert_eq!(expand_str(&table, "SQ(a + b)"), "( ( a + b ) * ( a + b ) )");
    }

    #[test]
    fn test_nested_expansion() {
        let mut table = MacroTable::new();
        table.define_object("A", "B");
        table.define_object("B", "42");
        assert_eq!(expand_str(&table, "A"), "42");
    }

    #[test]
    fn test_no_self_reexpansion() {
        let mut table = MacroTable::new();
        table.define_object("X", "X + 1");
        assert_eq!(expand_str(&table, "X"), "X + 1");
    }

    #[test]
    fn test_function_macro_without_call() {
        let mut table = MacroTable::new();
        table.define(
            "F",
            MacroDef {
                params: Some(vec!["x".into()]),
                body: scan("x"),
            },
        );
        assert_eq!(expand_str(&table, "int F ;"), "int F ;");
    }

    #[test]
    fn test_scan_multibyte_chars() {
        // Characters outside ASCII must come through as single Other tokens
        // without desynchronizing the scanner.
        let toks = scan("COUNT €");
        assert_eq!(toks[0], PpToken::Ident("COUNT".into()));
        assert_eq!(toks[1], PpToken::Other('€'));

        let toks = scan("a\u{2014}b");
        assert_eq!(
            toks,
            vec![
                PpToken::Ident("a".into()),
                PpToken::Other('\u{2014}'),
                PpToken::Ident("b".into()),
            ]
        );

        // Expansion of a line that mixes a live macro with multi-byte text.
        let mut table = MacroTable::new();
        table.define_object("COUNT", "4");
        assert_eq!(expand_str(&table, "COUNT €"), "4 €");
    }

    #[test]
    fn test_mentions_macro() {
        let mut table = MacroTable::new();
        table.define_object("LIGHT_COUNT", "4");
        assert!(table.mentions_macro("for (int i = 0; i < LIGHT_COUNT; ++i)"));
        assert!(!table.mentions_macro("for (int i = 0; i < 4; ++i)"));
        assert!(!table.mentions_macro("int LIGHT_COUNT2;"));
    }
}
