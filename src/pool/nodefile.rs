//! Node-list file parsing.
//!
//! One backend address per line. `#` starts a comment that runs to the end of
//! the line; blank lines and lines too short to hold an address are skipped.

/// Shortest line that can be an address (`1.2.3.4`).
pub const MIN_ADDRESS_LEN: usize = 7;

/// Extract the address from one line, if the line holds one.
pub fn parse_line(line: &str) -> Option<&str> {
    let line = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let line = line.trim();
    if line.len() < MIN_ADDRESS_LEN {
        return None;
    }
    Some(line)
}

/// Parse a whole node file into addresses, in file order.
pub fn parse_node_list(contents: &str) -> Vec<String> {
    contents.lines().filter_map(parse_line).map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_comment() {
        assert_eq!(parse_line("10.0.0.1:8080 # comment"), Some("10.0.0.1:8080"));
    }

    #[test]
    fn skips_blank_comment_and_short_lines() {
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("# 10.0.0.1:8080"), None);
        assert_eq!(parse_line("1.2.3"), None);
        assert_eq!(parse_line("1.2.3.4"), Some("1.2.3.4"));
    }

    #[test]
    fn parses_file_in_order() {
        let contents = "\
# pool members
10.0.0.2:80

10.0.0.1:80   # primary
  backend.internal:8080
bad
";
        assert_eq!(
            parse_node_list(contents),
            vec!["10.0.0.2:80", "10.0.0.1:80", "backend.internal:8080"]
        );
    }
}
