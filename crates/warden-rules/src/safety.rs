//! Guards for the `matches` operator.
//!
//! Policy rules are operator-authored but flow through shared
//! infrastructure, so pathological patterns must not be able to stall
//! evaluation. The contract: oversized patterns or inputs, nested
//! unbounded quantifiers, multiple unbounded wildcards, and patterns that
//! fail to compile all evaluate as unmatched.

use tracing::warn;

/// Longest accepted pattern, in characters.
pub const MAX_PATTERN_LEN: usize = 256;

/// Longest accepted input, in characters.
pub const MAX_INPUT_LEN: usize = 10_000;

/// Run `pattern` against `input` under the safety contract. Any guard
/// violation or compile failure returns `false`.
pub fn safe_regex_match(pattern: &str, input: &str) -> bool {
    if !pattern_is_safe(pattern) {
        return false;
    }
    if input.chars().count() > MAX_INPUT_LEN {
        return false;
    }
    match regex::Regex::new(pattern) {
        Ok(re) => re.is_match(input),
        Err(e) => {
            warn!(pattern, error = %e, "Rejecting uncompilable rule pattern");
            false
        }
    }
}

/// Structural pattern guards, exposed for policy validation at save time.
pub fn pattern_is_safe(pattern: &str) -> bool {
    if pattern.chars().count() > MAX_PATTERN_LEN {
        return false;
    }
    if has_nested_unbounded_quantifier(pattern) {
        return false;
    }
    if count_unbounded_wildcards(pattern) >= 2 {
        return false;
    }
    true
}

/// Detects a quantified group that itself contains an unbounded
/// quantifier, e.g. `(a+)+` or `(a*b)*` — the classic backtracking
/// blow-up shape.
fn has_nested_unbounded_quantifier(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    let mut stack: Vec<bool> = Vec::new(); // per open group: saw unbounded quantifier inside
    let mut escaped = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if escaped {
            escaped = false;
            i += 1;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '(' => stack.push(false),
            ')' => {
                let inner_unbounded = stack.pop().unwrap_or(false);
                // Group closed — is the group itself unboundedly quantified?
                let quantified = matches!(chars.get(i + 1), Some('*') | Some('+'))
                    || open_ended_brace(&chars, i + 1);
                if inner_unbounded && quantified {
                    return true;
                }
                if inner_unbounded {
                    if let Some(parent) = stack.last_mut() {
                        *parent = true;
                    }
                }
            }
            '*' | '+' => {
                if let Some(top) = stack.last_mut() {
                    *top = true;
                }
            }
            '{' => {
                if open_ended_brace(&chars, i) {
                    if let Some(top) = stack.last_mut() {
                        *top = true;
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }
    false
}

/// Is `chars[at..]` an open-ended repetition like `{3,}`?
fn open_ended_brace(chars: &[char], at: usize) -> bool {
    if chars.get(at) != Some(&'{') {
        return false;
    }
    let mut j = at + 1;
    let mut saw_digit = false;
    while let Some(&c) = chars.get(j) {
        match c {
            '0'..='9' => saw_digit = true,
            ',' => {
                // `{n,}` — open-ended iff the next char closes the brace
                return saw_digit && chars.get(j + 1) == Some(&'}');
            }
            _ => return false,
        }
        j += 1;
    }
    false
}

/// Counts unbounded wildcard tokens: `.*`, `.+`, or `.{n,}`.
fn count_unbounded_wildcards(pattern: &str) -> usize {
    let chars: Vec<char> = pattern.chars().collect();
    let mut count = 0;
    let mut escaped = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if escaped {
            escaped = false;
            i += 1;
            continue;
        }
        if c == '\\' {
            escaped = true;
            i += 1;
            continue;
        }
        if c == '.' {
            if matches!(chars.get(i + 1), Some('*') | Some('+')) || open_ended_brace(&chars, i + 1)
            {
                count += 1;
            }
        }
        i += 1;
    }
    count
}
