// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Printed value text handling.
//!
//! Values read off the session settings bus arrive as __printed text__ in the
//! GVariant text format, e.g. `'hello'`, `true`, `uint32 5`, or `['a', 'b']`.
//! Change records must carry a type signature next to the value so the admin
//! side can write the value back with the right type. Bus reads made through
//! the native API hand us the signature for free. Side-channel reads made
//! through an external command only hand us the printed text, so the
//! signature has to be inferred from the text itself.
//!
//! # Inference Rules
//!
//! The printed format is unambiguous for every value the inference cares
//! about. Explicit annotations (`@as []`, `uint32 5`) state their type
//! outright. Everything else reveals its type through its leading token:
//! quotes mean string, brackets mean container, bare words mean boolean or
//! number. Unannotated empty containers stay ambiguous in the text format and
//! are reported as errors rather than being guessed at.
//!
//! # See Also
//!
//! - [GVariant Text Format](https://docs.gtk.org/glib/gvariant-text-format.html)

/// Infer a type signature from printed value text.
///
/// # Errors
///
/// - Return [`Error::EmptyValue`] if the text is empty or whitespace.
/// - Return [`Error::EmptyContainer`] if an unannotated container has no
///   elements to infer a type from.
/// - Return [`Error::Unrecognized`] if the text matches no known printed
///   form.
pub fn infer_signature(text: &str) -> Result<String> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::EmptyValue);
    }

    // INVARIANT: Explicit annotations win over structural inference.
    if let Some(rest) = text.strip_prefix('@') {
        let signature: String = rest.chars().take_while(|ch| !ch.is_whitespace()).collect();
        if signature.is_empty() {
            return Err(Error::Unrecognized { text: text.into() });
        }
        return Ok(signature);
    }

    if let Some((keyword, rest)) = text.split_once(char::is_whitespace) {
        if keyword == "just" {
            return Ok(format!("m{}", infer_signature(rest)?));
        }
        if let Some(code) = keyword_signature(keyword) {
            return Ok(code.to_string());
        }
    }

    match text.chars().next() {
        Some('\'') | Some('"') => Ok("s".into()),
        Some('[') => {
            let elements = container_elements(text, '[', ']')?;
            let first = elements.first().ok_or_else(|| Error::EmptyContainer {
                text: text.into(),
            })?;
            Ok(format!("a{}", infer_signature(first)?))
        }
        Some('(') => {
            let elements = container_elements(text, '(', ')')?;
            let mut signature = String::from("(");
            for element in elements {
                signature.push_str(infer_signature(element)?.as_str());
            }
            signature.push(')');
            Ok(signature)
        }
        Some('{') => {
            let entries = container_elements(text, '{', '}')?;
            let first = entries.first().ok_or_else(|| Error::EmptyContainer {
                text: text.into(),
            })?;
            let pair = split_top_level(first, ':');
            let [key, value] = pair.as_slice() else {
                return Err(Error::Unrecognized { text: text.into() });
            };
            Ok(format!(
                "a{{{}{}}}",
                infer_signature(key)?,
                infer_signature(value)?
            ))
        }
        Some('<') => Ok("v".into()),
        _ => infer_scalar(text),
    }
}

/// Signature code for a printed type keyword.
fn keyword_signature(keyword: &str) -> Option<char> {
    let code = match keyword {
        "boolean" => 'b',
        "byte" => 'y',
        "int16" => 'n',
        "uint16" => 'q',
        "int32" => 'i',
        "uint32" => 'u',
        "int64" => 'x',
        "uint64" => 't',
        "handle" => 'h',
        "double" => 'd',
        "string" => 's',
        "objectpath" => 'o',
        "signature" => 'g',
        _ => return None,
    };

    Some(code)
}

fn infer_scalar(text: &str) -> Result<String> {
    if text == "true" || text == "false" {
        return Ok("b".into());
    }

    if text.parse::<i64>().is_ok() {
        return Ok("i".into());
    }

    if text.parse::<f64>().is_ok() {
        return Ok("d".into());
    }

    Err(Error::Unrecognized { text: text.into() })
}

/// Split a printed container into its top-level elements.
fn container_elements(text: &str, open: char, close: char) -> Result<Vec<&str>> {
    let inner = text
        .strip_prefix(open)
        .and_then(|rest| rest.strip_suffix(close))
        .ok_or_else(|| Error::Unrecognized { text: text.into() })?;

    Ok(split_top_level(inner, ','))
}

/// Split text on a delimiter, ignoring delimiters nested in containers or
/// quoted strings.
fn split_top_level(text: &str, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (position, ch) in text.char_indices() {
        if let Some(open_quote) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open_quote {
                quote = None;
            }
            continue;
        }

        match ch {
            '\'' | '"' => quote = Some(ch),
            '[' | '(' | '{' | '<' => depth += 1,
            ']' | ')' | '}' | '>' => depth = depth.saturating_sub(1),
            _ if ch == delimiter && depth == 0 => {
                let part = text[start..position].trim();
                if !part.is_empty() {
                    parts.push(part);
                }
                start = position + ch.len_utf8();
            }
            _ => {}
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        parts.push(tail);
    }

    parts
}

/// Printed value error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// Value text is empty or whitespace.
    #[error("cannot infer type signature from empty value text")]
    EmptyValue,

    /// Unannotated container carries no elements to infer from.
    #[error("cannot infer element type of empty container {text:?}")]
    EmptyContainer { text: String },

    /// Value text matches no known printed form.
    #[error("unrecognized printed value {text:?}")]
    Unrecognized { text: String },
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("'hello'", "s"; "single quoted string")]
    #[test_case("\"hi there\"", "s"; "double quoted string")]
    #[test_case("true", "b"; "boolean true")]
    #[test_case("false", "b"; "boolean false")]
    #[test_case("42", "i"; "bare integer")]
    #[test_case("-7", "i"; "negative integer")]
    #[test_case("3.14", "d"; "bare double")]
    #[test_case("uint32 9", "u"; "annotated uint32")]
    #[test_case("int64 -3", "x"; "annotated int64")]
    #[test_case("byte 0x1e", "y"; "annotated byte")]
    #[test_case("double 24", "d"; "annotated double")]
    #[test_case("objectpath '/org/gnome/Settings'", "o"; "annotated object path")]
    #[test_case("['a', 'b']", "as"; "string array")]
    #[test_case("[1, 2, 3]", "ai"; "integer array")]
    #[test_case("[['x'], ['y']]", "aas"; "nested array")]
    #[test_case("(1, 'two', false)", "(isb)"; "tuple")]
    #[test_case("()", "()"; "unit tuple")]
    #[test_case("{'a': 1}", "a{si}"; "dictionary")]
    #[test_case("{'k': <'v'>}", "a{sv}"; "vardict")]
    #[test_case("[(0, 1), (2, 3)]", "a(ii)"; "array of tuples")]
    #[test_case("@as []", "as"; "annotated empty array")]
    #[test_case("@a{sv} {}", "a{sv}"; "annotated empty vardict")]
    #[test_case("<'boxed'>", "v"; "variant")]
    #[test_case("just 5", "mi"; "maybe integer")]
    #[test]
    fn infers_signature_from_printed_text(text: &str, expect: &str) -> anyhow::Result<()> {
        // Shadow the prelude macro explicitly: the glob import in the module
        // `test_case` generates cannot, which makes `assert_eq` ambiguous.
        use pretty_assertions::assert_eq;

        let result = infer_signature(text)?;
        assert_eq!(result, expect);
        Ok(())
    }

    #[test_case(""; "empty text")]
    #[test_case("   "; "whitespace only")]
    #[test]
    fn rejects_empty_value_text(text: &str) {
        assert!(matches!(infer_signature(text), Err(Error::EmptyValue)));
    }

    #[test]
    fn rejects_unannotated_empty_container() {
        assert!(matches!(
            infer_signature("[]"),
            Err(Error::EmptyContainer { .. })
        ));
    }

    #[test]
    fn rejects_unknown_printed_form() {
        assert!(matches!(
            infer_signature("wibble"),
            Err(Error::Unrecognized { .. })
        ));
    }

    #[test]
    fn splits_nested_elements_at_the_top_level_only() {
        let result = split_top_level("(1, 'a'), ('b, c', 2)", ',');
        assert_eq!(result, vec!["(1, 'a')", "('b, c', 2)"]);
    }
}
