//! Command-line parsing: the verb/argument split and the address syntax
//! shared by MAIL and RCPT.

/// Split a command line into an upper-cased verb and its argument tail.
///
/// The verb is the longest leading run of non-space characters; a single
/// separating space is removed from the tail.
pub(crate) fn parse_line(line: &str) -> (String, &str) {
    match line.find(' ') {
        Some(idx) => (line[..idx].to_ascii_uppercase(), &line[idx + 1..]),
        None => (line.to_ascii_uppercase(), ""),
    }
}

/// Extract the angle-bracketed path from a `FROM:<path>` or `TO:<path>`
/// argument tail.
///
/// The path is everything between the first `<` and the matching `>`, so
/// `<>` yields the empty path (the null sender). Returns the path and the
/// parameter tail after the closing bracket, or `None` when the prefix or
/// the brackets are missing.
pub(crate) fn parse_path<'a>(args: &'a str, prefix: &str) -> Option<(String, &'a str)> {
    if args.len() < prefix.len() || !args[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return None;
    }
    let rest = args[prefix.len()..].trim_start();
    let open = rest.find('<')?;
    let close = open + rest[open..].find('>')?;
    let path = rest[open + 1..close].to_string();
    Some((path, rest[close + 1..].trim()))
}

/// Parse the ESMTP parameter tail of a MAIL command.
///
/// Only `SIZE=<digits>` is understood; other `key=value` parameters are
/// tolerated and ignored. A malformed SIZE value, a numeric overflow, or a
/// bare token all count as syntax errors.
pub(crate) fn parse_mail_params(params: &str) -> Result<Option<u64>, ()> {
    let mut declared = None;
    for token in params.split_ascii_whitespace() {
        match token.split_once('=') {
            Some((key, value)) if key.eq_ignore_ascii_case("SIZE") => {
                if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(());
                }
                declared = Some(value.parse::<u64>().map_err(|_| ())?);
            }
            Some((key, _)) if !key.is_empty() => {}
            _ => return Err(()),
        }
    }
    Ok(declared)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_verb_and_args() {
        let cases = [
            ("EHLO host.example.com", "EHLO", "host.example.com"),
            (
                "MAIL FROM:<sender@example.com>",
                "MAIL",
                "FROM:<sender@example.com>",
            ),
            (
                "RCPT TO:<recipient@example.com>",
                "RCPT",
                "TO:<recipient@example.com>",
            ),
            ("QUIT", "QUIT", ""),
            ("noop", "NOOP", ""),
            ("", "", ""),
        ];
        for (line, verb, args) in cases {
            assert_eq!(parse_line(line), (verb.to_string(), args));
        }
    }

    #[test]
    fn extracts_bracketed_paths() {
        assert_eq!(
            parse_path("FROM:<sender@example.com>", "FROM:"),
            Some(("sender@example.com".to_string(), ""))
        );
        assert_eq!(parse_path("FROM:<>", "FROM:"), Some((String::new(), "")));
        assert_eq!(
            parse_path("from:<a@x> SIZE=100", "FROM:"),
            Some(("a@x".to_string(), "SIZE=100"))
        );
        assert_eq!(
            parse_path("TO: <b@y>", "TO:"),
            Some(("b@y".to_string(), ""))
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        assert_eq!(parse_path("", "FROM:"), None);
        assert_eq!(parse_path("FROM:", "FROM:"), None);
        assert_eq!(parse_path("FROM:<unterminated", "FROM:"), None);
        assert_eq!(parse_path("TO:<a@x>", "FROM:"), None);
    }

    #[test]
    fn parses_size_parameter() {
        assert_eq!(parse_mail_params(""), Ok(None));
        assert_eq!(parse_mail_params("SIZE=1000"), Ok(Some(1000)));
        assert_eq!(parse_mail_params("size=0"), Ok(Some(0)));
        assert_eq!(parse_mail_params("BODY=8BITMIME SIZE=42"), Ok(Some(42)));
    }

    #[test]
    fn rejects_malformed_size_parameter() {
        assert_eq!(parse_mail_params("SIZE"), Err(()));
        assert_eq!(parse_mail_params("SIZE="), Err(()));
        assert_eq!(parse_mail_params("SIZE= "), Err(()));
        assert_eq!(parse_mail_params("SIZE=foo"), Err(()));
        assert_eq!(parse_mail_params("SIZE=-1"), Err(()));
        // Larger than any u64.
        assert_eq!(parse_mail_params("SIZE=99999999999999999999999"), Err(()));
    }
}
