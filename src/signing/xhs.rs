//! XHS (`x-s` / `x-t` / `x-s-common`) signing.
//!
//! `x-s` and `x-t` come from the platform's obfuscated `sign(uri, data, cookies)`
//! function executed in the script VM. `x-s-common` wraps them, together with
//! client constants, in a JSON object that is encoded with a shuffled Base64
//! alphabet and a CRC32-style checksum (`mrc`).

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::js_vm::JsVmSigner;
use super::{XhsSignRequest, XhsSignResult, cookie_value};

const CUSTOM_B64_ALPHABET: &[u8; 64] =
    b"ZmserbBoHQtNP+wOcza/LpngG8yJq42KWYj0DSfdikx3VT16IlUAFM97hECvuRX5";

const MRC_MAX_CHARS: usize = 57;
const MRC_XOR_KEY: u32 = 3_988_292_384;

const TRACE_ID_ALPHABET: &[u8] = b"abcdef0123456789";

static CRC_TABLE: [u32; 256] = build_crc_table();

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// Checksum over at most the first 57 characters of `input`, reported as a
/// signed 32-bit integer.
pub fn mrc(input: &str) -> i32 {
    let mut register: u32 = 0xFFFF_FFFF;
    for ch in input.chars().take(MRC_MAX_CHARS) {
        let index = ((register & 0xFF) ^ (ch as u32)) & 0xFF;
        register = CRC_TABLE[index as usize] ^ (register >> 8);
    }
    (register ^ 0xFFFF_FFFF ^ MRC_XOR_KEY) as i32
}

/// Base64 with the XHS alphabet; standard triplet packing and `=` padding.
pub fn custom_b64_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * 4);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;

        out.push(CUSTOM_B64_ALPHABET[((triple >> 18) & 0x3F) as usize] as char);
        out.push(CUSTOM_B64_ALPHABET[((triple >> 12) & 0x3F) as usize] as char);
        match chunk.len() {
            1 => out.push_str("=="),
            2 => {
                out.push(CUSTOM_B64_ALPHABET[((triple >> 6) & 0x3F) as usize] as char);
                out.push('=');
            }
            _ => {
                out.push(CUSTOM_B64_ALPHABET[((triple >> 6) & 0x3F) as usize] as char);
                out.push(CUSTOM_B64_ALPHABET[(triple & 0x3F) as usize] as char);
            }
        }
    }
    out
}

/// Percent-encode `input`, then walk the encoded form back into raw bytes.
pub fn encode_utf8(input: &str) -> Vec<u8> {
    let encoded = urlencoding::encode(input);
    let raw = encoded.as_bytes();
    let mut bytes = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'%' if i + 2 < raw.len() => {
                let hex = std::str::from_utf8(&raw[i + 1..i + 3]).unwrap_or("00");
                bytes.push(u8::from_str_radix(hex, 16).unwrap_or(0));
                i += 3;
            }
            b'+' => {
                bytes.push(b' ');
                i += 1;
            }
            other => {
                bytes.push(other);
                i += 1;
            }
        }
    }
    bytes
}

/// 16 random lowercase hex characters.
pub fn b3_trace_id() -> String {
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| TRACE_ID_ALPHABET[rng.gen_range(0..TRACE_ID_ALPHABET.len())] as char)
        .collect()
}

/// Browser/client constants embedded in `x-s-common`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XhsClientProfile {
    pub platform_code: u32,
    pub b1b1: String,
    pub sdk_version: String,
    pub os: String,
    pub app_id: String,
    pub app_version: String,
    /// `localStorage.b1` captured from a browser session.
    pub b1: String,
    pub sig_count: u32,
}

impl Default for XhsClientProfile {
    fn default() -> Self {
        Self {
            platform_code: 3,
            b1b1: "1".into(),
            sdk_version: "3.7.8-2".into(),
            os: "Mac OS".into(),
            app_id: "xhs-pc-web".into(),
            app_version: "4.27.2".into(),
            b1: String::new(),
            sig_count: 154,
        }
    }
}

#[derive(Serialize)]
struct XsCommon<'a> {
    s0: u32,
    s1: &'a str,
    x0: &'a str,
    x1: &'a str,
    x2: &'a str,
    x3: &'a str,
    x4: &'a str,
    x5: &'a str,
    x6: &'a str,
    x7: &'a str,
    x8: &'a str,
    x9: i32,
    x10: u32,
}

/// Build the `x-s-common` header value.
pub fn build_x_s_common(profile: &XhsClientProfile, a1: &str, x_t: &str, x_s: &str) -> String {
    let checksum = mrc(&format!("{x_t}{x_s}{}", profile.b1));
    let common = XsCommon {
        s0: profile.platform_code,
        s1: "",
        x0: &profile.b1b1,
        x1: &profile.sdk_version,
        x2: &profile.os,
        x3: &profile.app_id,
        x4: &profile.app_version,
        x5: a1,
        x6: x_t,
        x7: x_s,
        x8: &profile.b1,
        x9: checksum,
        x10: profile.sig_count,
    };
    // Serialising a struct of strings and integers cannot fail.
    let json = serde_json::to_string(&common).unwrap_or_default();
    custom_b64_encode(&encode_utf8(&json))
}

/// Hybrid signer: VM for `x-s`/`x-t`, native code for the rest.
pub struct XhsSigner {
    vm: JsVmSigner,
    profile: XhsClientProfile,
}

impl XhsSigner {
    pub const SIGN_FUNCTION: &'static str = "sign";

    pub fn new(vm: JsVmSigner, profile: XhsClientProfile) -> Self {
        Self { vm, profile }
    }

    pub fn profile(&self) -> &XhsClientProfile {
        &self.profile
    }

    pub async fn sign(&self, request: &XhsSignRequest) -> XhsSignResult {
        let data = request
            .data
            .as_ref()
            .map(|value| match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();

        let raw = self
            .vm
            .call_or_empty(
                Self::SIGN_FUNCTION,
                vec![request.uri.clone(), data, request.cookies.clone()],
            )
            .await;
        let (x_s, x_t) = parse_vm_output(&raw);

        let a1 = cookie_value(&request.cookies, "a1").unwrap_or_default();
        XhsSignResult {
            x_s_common: build_x_s_common(&self.profile, a1, &x_t, &x_s),
            x_s,
            x_t,
            x_b3_traceid: b3_trace_id(),
        }
    }
}

/// The script returns `{"X-s": .., "X-t": ..}`; key casing varies between
/// script revisions and `X-t` may be numeric.
fn parse_vm_output(raw: &str) -> (String, String) {
    let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw) else {
        return (String::new(), String::new());
    };
    let field = |name: &str| {
        map.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| match value {
                serde_json::Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };
    (field("x-s"), field("x-t"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmLimits;
    use crate::signing::ScriptSource;

    #[test]
    fn mrc_of_empty_string() {
        assert_eq!(mrc(""), -306_674_912);
    }

    #[test]
    fn mrc_only_reads_first_57_chars() {
        let base = "a".repeat(57);
        assert_eq!(mrc(&base), mrc(&format!("{base}trailing")));
        assert_ne!(mrc(&base), mrc(&"a".repeat(56)));
    }

    #[test]
    fn custom_b64_of_zero_bytes() {
        assert_eq!(custom_b64_encode(&[0, 0, 0]), "ZZZZ");
        assert_eq!(custom_b64_encode(&[0]), "ZZ==");
        assert_eq!(custom_b64_encode(&[0, 0]), "ZZZ=");
        assert_eq!(custom_b64_encode(&[]), "");
    }

    #[test]
    fn encode_utf8_yields_raw_utf8_bytes() {
        assert_eq!(encode_utf8("a b+c"), b"a b+c".to_vec());
        assert_eq!(encode_utf8("小红书"), "小红书".as_bytes().to_vec());
    }

    #[test]
    fn trace_id_shape() {
        let id = b3_trace_id();
        assert_eq!(id.len(), 16);
        assert!(id.bytes().all(|b| TRACE_ID_ALPHABET.contains(&b)));
    }

    #[test]
    fn x_s_common_is_custom_b64_of_compact_json() {
        let profile = XhsClientProfile::default();
        let encoded = build_x_s_common(&profile, "a1value", "1700000000000", "XYW_sig");
        assert!(!encoded.is_empty());
        assert!(
            encoded
                .bytes()
                .all(|b| CUSTOM_B64_ALPHABET.contains(&b) || b == b'=')
        );
        assert_eq!(encoded.len() % 4, 0);
    }

    #[test]
    fn parses_vm_output_case_insensitively() {
        let (xs, xt) = parse_vm_output(r#"{"X-s":"XYW_abc","X-t":1700000000000}"#);
        assert_eq!(xs, "XYW_abc");
        assert_eq!(xt, "1700000000000");
        assert_eq!(parse_vm_output("garbage"), (String::new(), String::new()));
    }

    #[tokio::test]
    async fn signs_with_embedded_script() {
        let script = r#"
            function sign(uri, data, cookies) {
                return { "X-s": "XYW_" + uri.length, "X-t": 1700000000000 };
            }
        "#;
        let vm = JsVmSigner::new("xhs", ScriptSource::inline(script), VmLimits::default());
        let signer = XhsSigner::new(vm, XhsClientProfile::default());
        let result = signer
            .sign(&XhsSignRequest {
                uri: "/api/sns/web/v1/feed".into(),
                data: Some(serde_json::json!({"source_note_id": "abc"})),
                cookies: "a1=18c4f2; web_session=xyz".into(),
            })
            .await;

        assert_eq!(result.x_s, "XYW_20");
        assert_eq!(result.x_t, "1700000000000");
        assert_eq!(
            result.x_s_common,
            build_x_s_common(signer.profile(), "18c4f2", "1700000000000", "XYW_20")
        );
    }

    #[tokio::test]
    async fn throwing_script_yields_empty_signature() {
        let script = "function sign() { throw new Error('boom'); }";
        let vm = JsVmSigner::new("xhs", ScriptSource::inline(script), VmLimits::default());
        let signer = XhsSigner::new(vm, XhsClientProfile::default());
        let result = signer.sign(&XhsSignRequest::default()).await;
        assert!(result.x_s.is_empty());
        assert!(result.x_t.is_empty());
        assert_eq!(result.x_b3_traceid.len(), 16);
    }
}
