//! GLSL preprocessor: macro expansion, conditional compilation, and
//! `#include` resolution through a pluggable resolver.
//!
//! Output is plain GLSL text with all directives consumed (except `#pragma`,
//! which passes through). `#version` and `#extension` are captured for the
//! later stages. Comments are stripped up front, with newlines preserved so
//! line numbers in downstream diagnostics stay meaningful.

pub mod include;
pub mod macros;

pub use include::{FileIncludeResolver, IncludeError, IncludeResolver, MemoryIncludeResolver, ResolvedInclude};
pub use macros::{MacroDef, MacroTable, PpToken};

use log::{debug, trace};
use thiserror::Error;

use macros::{scan, unscan};

/// Default cap on nested includes.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 64;

/// Preprocessing failure.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("include not found: `{header}` (included from {chain})")]
    IncludeNotFound { header: String, chain: String },

    #[error("include depth exceeded: more than {limit} nested includes")]
    IncludeDepthExceeded { limit: usize },

    #[error("{file}:{line}: {message}")]
    Directive {
        message: String,
        file: String,
        line: usize,
    },

    #[error("unterminated block comment in {file}")]
    UnterminatedComment { file: String },

    #[error("error reading include: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a preprocessor run.
#[derive(Debug, Clone)]
pub struct PreprocessorOutput {
    /// Preprocessed GLSL text.
    pub text: String,
    /// Value of the `#version` directive, if present.
    pub version: Option<u32>,
    /// Profile named by the `#version` directive (`core`, ...).
    pub profile: Option<String>,
    /// `#extension` directives as (name, behavior) pairs, in order.
    pub extensions: Vec<(String, String)>,
}

/// One level of `#if`/`#ifdef` nesting.
struct Cond {
    /// Whether the enclosing region is active.
    parent_active: bool,
    /// Whether any branch of this conditional has been taken.
    taken: bool,
    /// Whether the current branch is active.
    active: bool,
    seen_else: bool,
}

/// The preprocessor. One instance handles one compile call.
pub struct Preprocessor<'r> {
    resolver: &'r mut dyn IncludeResolver,
    max_depth: usize,
    macros: MacroTable,
    out: String,
    version: Option<u32>,
    profile: Option<String>,
    extensions: Vec<(String, String)>,
    /// Active include chain, outermost first, for error reporting.
    chain: Vec<String>,
}

impl<'r> Preprocessor<'r> {
    pub fn new(resolver: &'r mut dyn IncludeResolver) -> Self {
        Self::with_max_depth(resolver, DEFAULT_MAX_INCLUDE_DEPTH)
    }

    pub fn with_max_depth(resolver: &'r mut dyn IncludeResolver, max_depth: usize) -> Self {
        Self {
            resolver,
            max_depth,
            macros: MacroTable::new(),
            out: String::new(),
            version: None,
            profile: None,
            extensions: Vec::new(),
            chain: Vec::new(),
        }
    }

    /// Run the preprocessor over `source`. `preamble` (caller-supplied
    /// `#define` lines) is processed first with the same macro table.
    pub fn run(
        mut self,
        source: &str,
        name: &str,
        preamble: &str,
    ) -> Result<PreprocessorOutput, PreprocessError> {
        self.resolver.reset();

        if !preamble.is_empty() {
            self.process(preamble, "<preamble>", 0)?;
        }
        self.process(source, name, 0)?;

        debug!(
            "preprocessed {} -> {} bytes, version {:?}",
            name,
            self.out.len(),
            self.version
        );

        Ok(PreprocessorOutput {
            text: self.out,
            version: self.version,
            profile: self.profile,
            extensions: self.extensions,
        })
    }

    fn process(&mut self, text: &str, name: &str, depth: usize) -> Result<(), PreprocessError> {
        if depth > self.max_depth {
            return Err(PreprocessError::IncludeDepthExceeded {
                limit: self.max_depth,
            });
        }
        self.chain.push(name.to_string());
        trace!("preprocessing {} at depth {}", name, depth);

        let stripped = strip_comments(text).ok_or_else(|| PreprocessError::UnterminatedComment {
            file: name.to_string(),
        })?;
        let spliced = stripped.replace("\\\n", "").replace("\\\r\n", "");

        let mut conds: Vec<Cond> = Vec::new();

        for (line_idx, line) in spliced.lines().enumerate() {
            let line_no = line_idx + 1;
            let trimmed = line.trim_start();
            if let Some(rest) = trimmed.strip_prefix('#') {
                self.directive(rest.trim(), &mut conds, depth, name, line_no)?;
            } else if conds.iter().all(|c| c.active) {
                if self.macros.mentions_macro(line) {
                    self.out.push_str(&unscan(&self.macros.expand(&scan(line))));
                } else {
                    self.out.push_str(line);
                }
                self.out.push('\n');
            }
        }

        if !conds.is_empty() {
            return Err(self.err(name, 0, "unterminated conditional directive"));
        }

        self.chain.pop();
        Ok(())
    }

    fn err(&self, file: &str, line: usize, message: impl Into<String>) -> PreprocessError {
        PreprocessError::Directive {
            message: message.into(),
            file: file.to_string(),
            line,
        }
    }

    fn directive(
        &mut self,
        rest: &str,
        conds: &mut Vec<Cond>,
        depth: usize,
        file: &str,
        line: usize,
    ) -> Result<(), PreprocessError> {
        // A lone `#` is a null directive.
        if rest.is_empty() {
            return Ok(());
        }

        let (name, args) = split_ident(rest);
        let active = conds.iter().all(|c| c.active);

        match name {
            "if" | "ifdef" | "ifndef" => {
                let value = if !active {
                    false
                } else {
                    match name {
                        "ifdef" => self.macros.is_defined(split_ident(args).0),
                        "ifndef" => !self.macros.is_defined(split_ident(args).0),
                        _ => self
                            .eval_condition(args)
                            .map_err(|m| self.err(file, line, m))?,
                    }
                };
                conds.push(Cond {
                    parent_active: active,
                    taken: value,
                    active: value,
                    seen_else: false,
                });
            }
            "elif" => {
                let cond_value = {
                    let Some(cond) = conds.last() else {
                        return Err(self.err(file, line, "#elif without matching #if"));
                    };
                    if cond.seen_else {
                        return Err(self.err(file, line, "#elif after #else"));
                    }
                    if cond.parent_active && !cond.taken {
                        self.eval_condition(args)
                            .map_err(|m| self.err(file, line, m))?
                    } else {
                        false
                    }
                };
                if let Some(cond) = conds.last_mut() {
                    cond.active = cond_value;
                    cond.taken |= cond_value;
                }
            }
            "else" => {
                let Some(cond) = conds.last_mut() else {
                    return Err(self.err(file, line, "#else without matching #if"));
                };
                if cond.seen_else {
                    return Err(self.err(file, line, "duplicate #else"));
                }
                cond.active = cond.parent_active && !cond.taken;
                cond.taken = true;
                cond.seen_else = true;
            }
            "endif" => {
                if conds.pop().is_none() {
                    return Err(self.err(file, line, "#endif without matching #if"));
                }
            }

            _ if !active => {} // all other directives are skipped in dead code

            "define" => self.define(args, file, line)?,
            "undef" => self.macros.undef(split_ident(args).0),
            "include" => self.include(args, depth, file, line)?,
            "version" => {
                if self.version.is_some() {
                    return Err(self.err(file, line, "duplicate #version directive"));
                }
                let (num, after) = split_ident_or_number(args);
                let value: u32 = num
                    .parse()
                    .map_err(|_| self.err(file, line, "#version requires a number"))?;
                self.version = Some(value);
                let profile = after.trim();
                if !profile.is_empty() {
                    self.profile = Some(profile.to_string());
                }
                self.macros.define_object("__VERSION__", num);
            }
            "extension" => {
                let Some((ext, behavior)) = args.split_once(':') else {
                    return Err(self.err(file, line, "#extension requires `name : behavior`"));
                };
                self.extensions
                    .push((ext.trim().to_string(), behavior.trim().to_string()));
            }
            "pragma" => {
                // Passed through untouched.
                self.out.push_str("#pragma ");
                self.out.push_str(args);
                self.out.push('\n');
            }
            "line" => {} // accepted, ignored
            "error" => {
                return Err(self.err(file, line, format!("#error {}", args)));
            }
            other => {
                return Err(self.err(file, line, format!("unknown directive `#{}`", other)));
            }
        }
        Ok(())
    }

    fn define(&mut self, args: &str, file: &str, line: usize) -> Result<(), PreprocessError> {
        let (name, rest) = split_ident(args);
        if name.is_empty() {
            return Err(self.err(file, line, "#define requires a macro name"));
        }

        // A '(' immediately after the name makes it function-like.
        if let Some(param_rest) = rest.strip_prefix('(') {
            let Some(close) = param_rest.find(')') else {
                return Err(self.err(file, line, "unterminated macro parameter list"));
            };
            let params: Vec<String> = param_rest[..close]
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            let body = scan(&param_rest[close + 1..]);
            self.macros.define(name, MacroDef {
                params: Some(params),
                body,
            });
        } else {
            self.macros.define(name, MacroDef {
                params: None,
                body: scan(rest),
            });
        }
        Ok(())
    }

    fn include(
        &mut self,
        args: &str,
        depth: usize,
        file: &str,
        line: usize,
    ) -> Result<(), PreprocessError> {
        let args = args.trim();
        let (header, system) = if let Some(h) = args.strip_prefix('"').and_then(|a| a.strip_suffix('"')) {
            (h, false)
        } else if let Some(h) = args.strip_prefix('<').and_then(|a| a.strip_suffix('>')) {
            (h, true)
        } else {
            return Err(self.err(file, line, "#include requires \"header\" or <header>"));
        };

        let resolved = if system {
            self.resolver.resolve_system(header)
        } else {
            self.resolver.resolve_local(header, file, depth + 1)
        };

        match resolved {
            Ok(inc) => {
                let contents = String::from_utf8_lossy(&inc.contents).into_owned();
                self.process(&contents, &inc.name, depth + 1)
            }
            Err(IncludeError::NotFound) => Err(PreprocessError::IncludeNotFound {
                header: header.to_string(),
                chain: self.chain.join(" -> "),
            }),
            Err(IncludeError::Io(e)) => Err(PreprocessError::Io(e)),
        }
    }

    /// Evaluate a `#if`/`#elif` expression: replace `defined`, expand
    /// macros, then fold the constant expression.
    fn eval_condition(&self, expr: &str) -> Result<bool, String> {
        let tokens = scan(expr);
        let tokens = replace_defined(&tokens, &self.macros)?;
        let tokens = self.macros.expand(&tokens);
        let mut parser = CondParser {
            toks: &tokens,
            pos: 0,
        };
        let value = parser.expr(0)?;
        if parser.pos != tokens.len() {
            return Err("trailing tokens in conditional expression".to_string());
        }
        Ok(value != 0)
    }
}

/// Split a leading identifier off a string; returns (ident, rest).
fn split_ident(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    (&s[..end], s[end..].trim_start())
}

/// Split a leading number off a string; returns (number, rest).
fn split_ident_or_number(s: &str) -> (&str, &str) {
    split_ident(s)
}

/// Replace `defined(X)` / `defined X` with 1 or 0 before expansion.
fn replace_defined(tokens: &[PpToken], macros: &MacroTable) -> Result<Vec<PpToken>, String> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            PpToken::Ident(name) if name == "defined" => {
                let (target, consumed) = match tokens.get(i + 1) {
                    Some(PpToken::Punct("(")) => match (tokens.get(i + 2), tokens.get(i + 3)) {
                        (Some(PpToken::Ident(n)), Some(PpToken::Punct(")"))) => (n.clone(), 4),
                        _ => return Err("malformed defined() operator".to_string()),
                    },
                    Some(PpToken::Ident(n)) => (n.clone(), 2),
                    _ => return Err("malformed defined operator".to_string()),
                };
                let value = if macros.is_defined(&target) { "1" } else { "0" };
                out.push(PpToken::Number(value.to_string()));
                i += consumed;
            }
            tok => {
                out.push(tok.clone());
                i += 1;
            }
        }
    }
    Ok(out)
}

/// Precedence-climbing evaluator for preprocessor constant expressions.
struct CondParser<'a> {
    toks: &'a [PpToken],
    pos: usize,
}

impl<'a> CondParser<'a> {
    fn peek(&self) -> Option<&PpToken> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<&PpToken> {
        let tok = self.toks.get(self.pos);
        self.pos += 1;
        tok
    }

    fn expr(&mut self, min_prec: u8) -> Result<i64, String> {
        let mut lhs = self.unary()?;

        while let Some(PpToken::Punct(p)) = self.peek() {
            let Some(prec) = binary_prec(p) else { break };
            if prec < min_prec {
                break;
            }
            let op = *p;
            self.pos += 1;
            let rhs = self.expr(prec + 1)?;
            lhs = apply_binary(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        match self.bump() {
            Some(PpToken::Punct("!")) => Ok((self.unary()? == 0) as i64),
            Some(PpToken::Punct("~")) => Ok(!self.unary()?),
            Some(PpToken::Punct("-")) => Ok(self.unary()?.wrapping_neg()),
            Some(PpToken::Punct("+")) => self.unary(),
            Some(PpToken::Punct("(")) => {
                let v = self.expr(0)?;
                match self.bump() {
                    Some(PpToken::Punct(")")) => Ok(v),
                    _ => Err("expected `)` in conditional expression".to_string()),
                }
            }
            Some(PpToken::Number(n)) => parse_pp_int(n),
            // Surviving identifiers (undefined macros) evaluate to 0.
            Some(PpToken::Ident(_)) => Ok(0),
            _ => Err("malformed conditional expression".to_string()),
        }
    }
}

fn binary_prec(op: &str) -> Option<u8> {
    Some(match op {
        "||" => 1,
        "&&" => 2,
        "|" => 3,
        "^" => 4,
        "&" => 5,
        "==" | "!=" => 6,
        "<" | ">" | "<=" | ">=" => 7,
        "<<" | ">>" => 8,
        "+" | "-" => 9,
        "*" | "/" | "%" => 10,
        _ => return None,
    })
}

fn apply_binary(op: &str, lhs: i64, rhs: i64) -> Result<i64, String> {
    Ok(match op {
        "||" => ((lhs != 0) || (rhs != 0)) as i64,
        "&&" => ((lhs != 0) && (rhs != 0)) as i64,
        "|" => lhs | rhs,
        "^" => lhs ^ rhs,
        "&" => lhs & rhs,
        "==" => (lhs == rhs) as i64,
        "!=" => (lhs != rhs) as i64,
        "<" => (lhs < rhs) as i64,
        ">" => (lhs > rhs) as i64,
        "<=" => (lhs <= rhs) as i64,
        ">=" => (lhs >= rhs) as i64,
        "<<" => lhs.wrapping_shl(rhs as u32),
        ">>" => lhs.wrapping_shr(rhs as u32),
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" => {
            if rhs == 0 {
                return Err("division by zero in conditional expression".to_string());
            }
            lhs.wrapping_div(rhs)
        }
        "%" => {
            if rhs == 0 {
                return Err("division by zero in conditional expression".to_string());
            }
            lhs.wrapping_rem(rhs)
        }
        _ => return Err(format!("invalid operator `{}` in conditional", op)),
    })
}

/// Parse a preprocessor integer literal (decimal, octal, hex; `u`/`U`
/// suffix tolerated).
fn parse_pp_int(text: &str) -> Result<i64, String> {
    let t = text.trim_end_matches(['u', 'U']);
    let parsed = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if t.len() > 1 && t.starts_with('0') {
        i64::from_str_radix(&t[1..], 8)
    } else {
        t.parse()
    };
    parsed.map_err(|_| format!("invalid integer `{}` in conditional", text))
}

/// Strip comments, preserving newlines (and thus line numbers). Returns
/// `None` on an unterminated block comment.
fn strip_comments(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'/' && i + 1 < bytes.len() {
            match bytes[i + 1] {
                b'/' => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                    continue;
                }
                b'*' => {
                    i += 2;
                    let mut closed = false;
                    out.push(' ');
                    while i < bytes.len() {
                        if bytes[i] == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                            i += 2;
                            closed = true;
                            break;
                        }
                        if bytes[i] == b'\n' {
                            out.push('\n');
                        }
                        i += 1;
                    }
                    if !closed {
                        return None;
                    }
                    continue;
                }
                _ => {}
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pp(source: &str) -> Result<PreprocessorOutput, PreprocessError> {
        let mut resolver = MemoryIncludeResolver::new();
        Preprocessor::new(&mut resolver).run(source, "<shader>", "")
    }

    #[test]
    fn test_version_capture() {
        let out = pp("#version 450\nvoid main() {}\n").unwrap();
        assert_eq!(out.version, Some(450));
        assert!(!out.text.contains("#version"));
        assert!(out.text.contains("void main"));
    }

    #[test]
    fn test_duplicate_version_rejected() {
        assert!(pp("#version 450\n#version 460\n").is_err());
    }

    #[test]
    fn test_conditionals() {
        let src = "#define USE_A 1\n#if USE_A\nfloat a;\n#else\nfloat b;\n#endif\n";
        let out = pp(src).unwrap();
        assert!(out.text.contains("float a"));
        assert!(!out.text.contains("float b"));
    }

    #[test]
    fn test_elif_chain() {
        let src = "#define MODE 2\n#if MODE == 1\nint one;\n#elif MODE == 2\nint two;\n#elif MODE == 3\nint three;\n#else\nint other;\n#endif\n";
        let out = pp(src).unwrap();
        assert!(out.text.contains("int two"));
        assert!(!out.text.contains("int one"));
        assert!(!out.text.contains("int three"));
        assert!(!out.text.contains("int other"));
    }

    #[test]
    fn test_defined_operator() {
        let src = "#define FOO\n#if defined(FOO) && !defined(BAR)\nint yes;\n#endif\n";
        let out = pp(src).unwrap();
        assert!(out.text.contains("int yes"));
    }

    #[test]
    fn test_nested_dead_code_skipped() {
        let src = "#if 0\n#error should not fire\n#if 1\n#endif\n#endif\nint live;\n";
        let out = pp(src).unwrap();
        assert!(out.text.contains("int live"));
    }

    #[test]
    fn test_macro_expansion_in_body() {
        let src = "#define COUNT 4\nfloat v[COUNT];\n";
        let out = pp(src).unwrap();
        assert!(out.text.contains('4'));
        assert!(!out.text.contains("COUNT"));
    }

    #[test]
    fn test_preamble_definitions() {
        let mut resolver = MemoryIncludeResolver::new();
        let out = Preprocessor::new(&mut resolver)
            .run(
                "#ifdef MYVALUE\nint from_preamble = MYVALUE;\n#endif\n",
                "<shader>",
                "#define MYVALUE 2\n",
            )
            .unwrap();
        assert!(out.text.contains("int from_preamble = 2"));
    }

    #[test]
    fn test_include_substitution() {
        let mut resolver = MemoryIncludeResolver::new();
        resolver.add_file("inc/a.glsl", b"float from_include;\n".to_vec());
        resolver.push_external_directory("inc");

        let out = Preprocessor::new(&mut resolver)
            .run("#include \"a.glsl\"\nvoid main() {}\n", "<shader>", "")
            .unwrap();
        assert!(out.text.contains("float from_include"));
    }

    #[test]
    fn test_include_not_found() {
        let mut resolver = MemoryIncludeResolver::new();
        let err = Preprocessor::new(&mut resolver)
            .run("#include \"missing.glsl\"\n", "<shader>", "")
            .unwrap_err();
        match err {
            PreprocessError::IncludeNotFound { header, chain } => {
                assert_eq!(header, "missing.glsl");
                assert!(chain.contains("<shader>"));
            }
            other => panic!("expected IncludeNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_include_depth_exceeded() {
        let mut resolver = MemoryIncludeResolver::new();
        resolver.add_file("rec/loop.glsl", b"#include \"loop.glsl\"\n".to_vec());
        resolver.push_external_directory("rec");

        let err = Preprocessor::with_max_depth(&mut resolver, 8)
            .run("#include \"loop.glsl\"\n", "<shader>", "")
            .unwrap_err();
        assert!(matches!(err, PreprocessError::IncludeDepthExceeded { limit: 8 }));
    }

    #[test]
    fn test_system_include_fails_by_default() {
        let mut resolver = MemoryIncludeResolver::new();
        let err = Preprocessor::new(&mut resolver)
            .run("#include <stdio.h>\n", "<shader>", "")
            .unwrap_err();
        assert!(matches!(err, PreprocessError::IncludeNotFound { .. }));
    }

    #[test]
    fn test_pragma_passthrough() {
        let out = pp("#pragma optimize(off)\nvoid main() {}\n").unwrap();
        assert!(out.text.contains("#pragma optimize(off)"));
    }

    #[test]
    fn test_comments_stripped() {
        let out = pp("// line comment\nint a; /* block\ncomment */ int b;\n").unwrap();
        assert!(!out.text.contains("comment"));
        assert!(out.text.contains("int a;"));
        assert!(out.text.contains("int b;"));
    }

    #[test]
    fn test_unterminated_comment() {
        assert!(matches!(
            pp("int a; /* never closed\n"),
            Err(PreprocessError::UnterminatedComment { .. })
        ));
    }

    #[test]
    fn test_extension_capture() {
        let out = pp("#extension GL_GOOGLE_include_directive : enable\nvoid main(){}\n").unwrap();
        assert_eq!(
            out.extensions,
            vec![("GL_GOOGLE_include_directive".to_string(), "enable".to_string())]
        );
    }

    #[test]
    fn test_line_continuation() {
        let out = pp("#define WIDE \\\n 42\nint x = WIDE;\n").unwrap();
        assert!(out.text.contains("42"));
    }
}
