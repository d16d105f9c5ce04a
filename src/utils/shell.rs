//! Shell quoting, used to render invocations for logs and error details.

const SHELL_META: &[char] = &[
    ' ', '\t', '\n', '\'', '"', '\\', '$', '`', '!', '*', '?', '[', ']', '(', ')', '{', '}', '<',
    '>', '|', '&', ';', '#', '~',
];

/// Quote one argument so a POSIX shell reads it back unchanged.
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if !arg.contains(SHELL_META) {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

pub fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|a| quote_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_words_stay_bare() {
        assert_eq!(quote_arg("--selector=app.kubernetes.io/name=lms"), "--selector=app.kubernetes.io/name=lms");
    }

    #[test]
    fn metacharacters_are_single_quoted() {
        assert_eq!(quote_arg("echo hi"), "'echo hi'");
        assert_eq!(quote_arg("it's"), "'it'\\''s'");
        assert_eq!(quote_arg(""), "''");
    }

    #[test]
    fn quote_args_joins_with_spaces() {
        let args = vec!["sh".to_string(), "-c".to_string(), "a && b".to_string()];
        assert_eq!(quote_args(&args), "sh -c 'a && b'");
    }
}
