/// Characters dropped from prompts
const STRIPPED: [char; 4] = ['|', '"', '<', '>'];

/// Cleans user text before it is handed to the engine
///
/// `&` becomes `and`, `| " < >` are dropped and every line break becomes a
/// single space, so the engine sees one line.
pub fn sanitize_prompt(input: &str) -> String {
    input
        .replace('&', "and")
        .replace(STRIPPED, "")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}

/// Human-readable label for a playback speed, e.g. `Normal (1.0x)`
///
/// The speed is the engine's length scale: values below 1 speak faster.
pub fn describe_speed(speed: f64) -> String {
    let rounded = (speed * 10.0).round() / 10.0;
    let label = if (rounded - 1.0).abs() < f64::EPSILON {
        "Normal"
    } else if rounded < 1.0 {
        "Fast"
    } else {
        "Slow"
    };
    format!("{label} ({rounded:.1}x)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_mixed_prompt() {
        let cleaned = sanitize_prompt("He said \"hi\" <now> | always & forever\r\ndone");
        assert_eq!(cleaned, "He said hi now  always and forever done");
        assert!(!cleaned.contains(['\r', '\n']));
    }

    #[test]
    fn test_sanitize_line_breaks() {
        assert_eq!(sanitize_prompt("one\ntwo\r\nthree\rfour"), "one two three four");
    }

    #[test]
    fn test_sanitize_leaves_plain_text() {
        assert_eq!(sanitize_prompt("Hello, world!"), "Hello, world!");
    }

    #[test]
    fn test_describe_speed() {
        assert_eq!(describe_speed(1.0), "Normal (1.0x)");
        assert_eq!(describe_speed(1.04), "Normal (1.0x)");
        assert_eq!(describe_speed(0.75), "Fast (0.8x)");
        assert_eq!(describe_speed(1.5), "Slow (1.5x)");
    }
}
