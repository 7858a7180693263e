//! 请求指纹
//!
//! 对逻辑请求的各字段做规范化（去首尾空白、折叠内部空白、Unicode 小写）后按字段名排序，
//! 再取 SHA-256。字段的添加顺序、大小写和空白差异都不影响结果。
//! 每个字段名和字段值都带 8 字节长度前缀写入摘要，任何内容都无法伪造字段边界。

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

/// 确定性的请求指纹，形如 `{kind}:{sha256 hex}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn builder(kind: impl Into<String>) -> FingerprintBuilder {
        FingerprintBuilder {
            kind: normalize(&kind.into()),
            fields: BTreeMap::new(),
        }
    }

    /// 单字段指纹，例如规范化后的题目文本
    pub fn of(kind: impl Into<String>, text: &str) -> Self {
        Self::builder(kind).field("text", text).finish()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    kind: String,
    fields: BTreeMap<String, String>,
}

impl FingerprintBuilder {
    /// 添加字段；同名字段后者覆盖前者
    pub fn field(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.fields.insert(normalize(name), normalize(value.as_ref()));
        self
    }

    pub fn finish(self) -> Fingerprint {
        let mut hasher = Sha256::new();
        for (name, value) in &self.fields {
            update_prefixed(&mut hasher, name);
            update_prefixed(&mut hasher, value);
        }
        Fingerprint(format!("{}:{}", self.kind, hex::encode(hasher.finalize())))
    }
}

fn update_prefixed(hasher: &mut Sha256, part: &str) {
    hasher.update((part.len() as u64).to_be_bytes());
    hasher.update(part.as_bytes());
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
