use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

/// 当前请求的设备指纹
///
/// 由 User-Agent 归类出 {device, browser, userAgent} 三元组。
/// 归类启发式本身是黑盒：token 核心只消费结果，不关心判定细节。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// 设备类型: phone / tablet / desktop / web / unknown
    pub device: String,
    /// 浏览器类型，识别不出时为 "desktop"
    pub browser: String,
    /// 原始 User-Agent
    pub user_agent: String,
}

/// 已知浏览器关键字（顺序重要：Edge/Opera 的 UA 同时包含 Chrome，
/// Chrome 的 UA 同时包含 Safari）
const BROWSERS: &[(&str, &str)] = &[
    ("Edg", "edge"),
    ("OPR", "opera"),
    ("Opera", "opera"),
    ("Firefox", "firefox"),
    ("Chrome", "chrome"),
    ("CriOS", "chrome"),
    ("Safari", "safari"),
];

impl Fingerprint {
    /// 根据 User-Agent 归类当前请求
    pub fn classify(user_agent: &str) -> Self {
        let browser = Self::browser_type(user_agent);
        let device = Self::device_type(user_agent, &browser);

        Self {
            device,
            browser,
            user_agent: user_agent.to_string(),
        }
    }

    /// 从请求头中取 User-Agent 并归类
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        Self::classify(user_agent)
    }

    fn browser_type(user_agent: &str) -> String {
        for (needle, name) in BROWSERS {
            if user_agent.contains(needle) {
                return name.to_string();
            }
        }

        "desktop".to_string()
    }

    fn device_type(user_agent: &str, browser: &str) -> String {
        let is_tablet = user_agent.contains("iPad")
            || user_agent.contains("Tablet")
            || (user_agent.contains("Android") && !user_agent.contains("Mobile"));
        let is_phone = user_agent.contains("iPhone")
            || user_agent.contains("iPod")
            || (user_agent.contains("Android") && user_agent.contains("Mobile"))
            || user_agent.contains("Windows Phone");

        if is_tablet {
            "tablet".to_string()
        } else if is_phone {
            "phone".to_string()
        } else if user_agent.contains("Electron") {
            "desktop".to_string()
        } else if browser != "desktop" {
            "web".to_string()
        } else if user_agent.is_empty() {
            "unknown".to_string()
        } else {
            "desktop".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) \
         AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";
    const ANDROID_CHROME: &str = "Mozilla/5.0 (Linux; Android 14; Pixel 8) \
         AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
    const DESKTOP_FIREFOX: &str =
        "Mozilla/5.0 (X11; Linux x86_64; rv:120.0) Gecko/20100101 Firefox/120.0";

    #[test]
    fn test_classify_phone() {
        let fp = Fingerprint::classify(IPHONE_SAFARI);
        assert_eq!(fp.device, "phone");
        assert_eq!(fp.browser, "safari");

        let fp = Fingerprint::classify(ANDROID_CHROME);
        assert_eq!(fp.device, "phone");
        assert_eq!(fp.browser, "chrome");
    }

    #[test]
    fn test_classify_tablet() {
        let fp = Fingerprint::classify(
            "Mozilla/5.0 (iPad; CPU OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Safari/604.1",
        );
        assert_eq!(fp.device, "tablet");
    }

    #[test]
    fn test_classify_web_browser() {
        let fp = Fingerprint::classify(DESKTOP_FIREFOX);
        assert_eq!(fp.device, "web");
        assert_eq!(fp.browser, "firefox");
    }

    #[test]
    fn test_classify_unknown() {
        let fp = Fingerprint::classify("");
        assert_eq!(fp.device, "unknown");
        assert_eq!(fp.browser, "desktop");
    }

    #[test]
    fn test_classify_keeps_user_agent() {
        let fp = Fingerprint::classify(DESKTOP_FIREFOX);
        assert_eq!(fp.user_agent, DESKTOP_FIREFOX);
    }
}
