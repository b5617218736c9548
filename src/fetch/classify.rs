/// Markers of anti-bot interstitials, matched case-insensitively
const CAPTCHA_MARKERS: &[&str] = &[
    "cf-challenge",
    "cf_chl_opt",
    "challenge-platform",
    "cf-turnstile",
    "g-recaptcha",
    "h-captcha",
    "hcaptcha.com",
    "<title>just a moment",
    "attention required! | cloudflare",
    "ddos-guard",
];

/// Status codes treated as a network-level block
const BLOCK_STATUSES: &[u16] = &[403, 429, 503];

/// Block classification of a response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockClass {
    pub blocked: bool,
    pub is_captcha: bool,
    pub reason: Option<String>,
}

/// Classifies a response as a challenge page, a block, or neither
///
/// A challenge page wins over a blocking status: Cloudflare serves its challenge
/// with 403/503, and a solvable challenge is not an IP block.
pub fn classify_response(status: u16, body: &str) -> BlockClass {
    let lowered = body.to_ascii_lowercase();
    if CAPTCHA_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return BlockClass {
            blocked: false,
            is_captcha: true,
            reason: Some("captcha challenge".to_string()),
        };
    }

    if BLOCK_STATUSES.contains(&status) {
        return BlockClass {
            blocked: true,
            is_captcha: false,
            reason: Some(format!("http {}", status)),
        };
    }

    BlockClass::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_page_not_blocked() {
        let class = classify_response(200, "<html><title>Movie</title></html>");
        assert_eq!(class, BlockClass::default());
    }

    #[test]
    fn test_blocking_statuses() {
        for status in [403, 429, 503] {
            let class = classify_response(status, "nope");
            assert!(class.blocked, "status {} should block", status);
            assert_eq!(class.reason, Some(format!("http {}", status)));
        }
        assert!(!classify_response(404, "missing").blocked);
        assert!(!classify_response(500, "oops").blocked);
    }

    #[test]
    fn test_challenge_page_is_captcha_not_block() {
        let body = "<html><head><title>Just a moment...</title></head></html>";
        let class = classify_response(503, body);
        assert!(class.is_captcha);
        assert!(!class.blocked);
    }

    #[test]
    fn test_recaptcha_on_ok_page() {
        let class = classify_response(200, r#"<div class="g-recaptcha" data-sitekey="x"></div>"#);
        assert!(class.is_captcha);
    }
}
