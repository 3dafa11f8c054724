//! Alpha-test and blend state
//!
//! Both states accept several loose TOML forms and normalize them to one
//! canonical shape. Codes match the numbering exposed to shaders.

use crate::diagnostics::{Diagnostics, as_number, first_present, read_string};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use toml::{Table, Value};

/// Alpha-test comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlphaFunc {
    Never,
    Less,
    Equal,
    Lequal,
    Greater,
    Notequal,
    Gequal,
    Always,
}

impl AlphaFunc {
    const ALL: [AlphaFunc; 8] = [
        AlphaFunc::Never,
        AlphaFunc::Less,
        AlphaFunc::Equal,
        AlphaFunc::Lequal,
        AlphaFunc::Greater,
        AlphaFunc::Notequal,
        AlphaFunc::Gequal,
        AlphaFunc::Always,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::Less => "less",
            Self::Equal => "equal",
            Self::Lequal => "lequal",
            Self::Greater => "greater",
            Self::Notequal => "notequal",
            Self::Gequal => "gequal",
            Self::Always => "always",
        }
    }

    /// Shader-facing code, `never` = 0 through `always` = 7
    pub fn code(&self) -> u32 {
        *self as u32
    }
}

impl FromStr for AlphaFunc {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.as_str() == lower).ok_or(())
    }
}

impl fmt::Display for AlphaFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical alpha-test triple
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlphaState {
    pub enabled: bool,
    pub function: AlphaFunc,
    pub reference: f64,
}

impl AlphaState {
    pub const DISABLED: AlphaState = AlphaState {
        enabled: false,
        function: AlphaFunc::Always,
        reference: 0.0,
    };

    /// Enabled state; a non-finite reference becomes 0
    pub fn enabled(function: AlphaFunc, reference: f64) -> Self {
        Self {
            enabled: true,
            function,
            reference: if reference.is_finite() { reference } else { 0.0 },
        }
    }
}

impl Default for AlphaState {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    Src1Color,
    OneMinusSrc1Color,
    Src1Alpha,
    OneMinusSrc1Alpha,
}

impl BlendFactor {
    const ALL: [BlendFactor; 18] = [
        BlendFactor::Zero,
        BlendFactor::One,
        BlendFactor::SrcColor,
        BlendFactor::OneMinusSrcColor,
        BlendFactor::DstColor,
        BlendFactor::OneMinusDstColor,
        BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha,
        BlendFactor::ConstantColor,
        BlendFactor::OneMinusConstantColor,
        BlendFactor::ConstantAlpha,
        BlendFactor::OneMinusConstantAlpha,
        BlendFactor::Src1Color,
        BlendFactor::OneMinusSrc1Color,
        BlendFactor::Src1Alpha,
        BlendFactor::OneMinusSrc1Alpha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zero => "zero",
            Self::One => "one",
            Self::SrcColor => "src_color",
            Self::OneMinusSrcColor => "one_minus_src_color",
            Self::DstColor => "dst_color",
            Self::OneMinusDstColor => "one_minus_dst_color",
            Self::SrcAlpha => "src_alpha",
            Self::OneMinusSrcAlpha => "one_minus_src_alpha",
            Self::DstAlpha => "dst_alpha",
            Self::OneMinusDstAlpha => "one_minus_dst_alpha",
            Self::ConstantColor => "constant_color",
            Self::OneMinusConstantColor => "one_minus_constant_color",
            Self::ConstantAlpha => "constant_alpha",
            Self::OneMinusConstantAlpha => "one_minus_constant_alpha",
            Self::Src1Color => "src1_color",
            Self::OneMinusSrc1Color => "one_minus_src1_color",
            Self::Src1Alpha => "src1_alpha",
            Self::OneMinusSrc1Alpha => "one_minus_src1_alpha",
        }
    }

    /// Shader-facing code, `zero` = 0 through `one_minus_src1_alpha` = 17
    pub fn code(&self) -> u32 {
        *self as u32
    }
}

impl FromStr for BlendFactor {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.as_str() == lower).ok_or(())
    }
}

impl fmt::Display for BlendFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical blend state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlendState {
    pub enabled: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
}

impl BlendState {
    pub const DISABLED: BlendState = BlendState {
        enabled: false,
        src_color: BlendFactor::One,
        dst_color: BlendFactor::Zero,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::Zero,
    };

    /// Classic alpha blending
    pub const ALPHA: BlendState = BlendState {
        enabled: true,
        src_color: BlendFactor::SrcAlpha,
        dst_color: BlendFactor::OneMinusSrcAlpha,
        src_alpha: BlendFactor::One,
        dst_alpha: BlendFactor::Zero,
    };
}

impl Default for BlendState {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Reads `alpha_test` (aliases `alphaTest`, `alpha`) from `table`
///
/// # Returns
///
/// `None` if none of the keys is present. Malformed values record an error and
/// yield [`AlphaState::DISABLED`].
pub fn read_alpha_state(table: &Table, context: &str, diag: &mut Diagnostics) -> Option<AlphaState> {
    let (_, raw) = first_present(table, &["alpha_test", "alphaTest", "alpha"])?;
    let context = format!("{context}.alpha_test");
    Some(match raw {
        Value::Boolean(true) => AlphaState::enabled(AlphaFunc::Greater, 0.0),
        Value::Boolean(false) => AlphaState::DISABLED,
        Value::Integer(_) | Value::Float(_) => AlphaState::enabled(AlphaFunc::Greater, as_number(raw).unwrap_or_default()),
        Value::String(text) => parse_alpha_string(text, &context, diag),
        Value::Table(alpha) => {
            let function = read_string(alpha, "func", &context, diag).or_else(|| read_string(alpha, "function", &context, diag));
            let reference = match first_present(alpha, &["ref", "reference"]) {
                Some((_, value)) => as_number(value).unwrap_or_else(|| {
                    diag.error(format!("Invalid number for {context}.ref"));
                    0.0
                }),
                None => 0.0,
            };
            match function {
                Some(function) => match function.parse::<AlphaFunc>() {
                    Ok(func) => AlphaState::enabled(func, reference),
                    Err(()) => {
                        diag.error(format!("Unsupported alpha func '{function}' in {context}."));
                        AlphaState::DISABLED
                    }
                },
                None => AlphaState::enabled(AlphaFunc::Greater, reference),
            }
        }
        _ => {
            diag.error(format!("Invalid value for {context} (expected boolean, number, string or table)."));
            AlphaState::DISABLED
        }
    })
}

fn parse_alpha_string(text: &str, context: &str, diag: &mut Diagnostics) -> AlphaState {
    let normalized = text.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" | "off" | "false" | "none" => return AlphaState::DISABLED,
        "on" | "true" => return AlphaState::enabled(AlphaFunc::Greater, 0.0),
        _ => {}
    }
    let tokens = split_tokens(&normalized);
    match tokens.as_slice() {
        [single] => {
            if let Ok(func) = single.parse::<AlphaFunc>() {
                return AlphaState::enabled(func, 0.0);
            }
            match single.parse::<f64>() {
                Ok(reference) => AlphaState::enabled(AlphaFunc::Greater, reference),
                Err(_) => {
                    diag.error(format!("Invalid alpha state '{text}' in {context}."));
                    AlphaState::DISABLED
                }
            }
        }
        [func, reference] => {
            let Ok(func) = func.parse::<AlphaFunc>() else {
                diag.error(format!("Unsupported alpha func '{func}' in {context}."));
                return AlphaState::DISABLED;
            };
            match reference.parse::<f64>() {
                Ok(reference) => AlphaState::enabled(func, reference),
                Err(_) => {
                    diag.error(format!("Invalid alpha reference '{reference}' in {context}."));
                    AlphaState::DISABLED
                }
            }
        }
        _ => {
            diag.error(format!("Invalid alpha state '{text}' in {context} (expected '<func> <ref>')."));
            AlphaState::DISABLED
        }
    }
}

/// Reads `blend` from `table`
///
/// # Returns
///
/// `None` if the key is absent. Malformed values record an error and yield
/// [`BlendState::DISABLED`].
pub fn read_blend_state(table: &Table, context: &str, diag: &mut Diagnostics) -> Option<BlendState> {
    let raw = table.get("blend")?;
    let context = format!("{context}.blend");
    Some(match raw {
        Value::Boolean(true) => BlendState::ALPHA,
        Value::Boolean(false) => BlendState::DISABLED,
        Value::String(text) => {
            let tokens: Vec<String> = split_tokens(text).into_iter().map(str::to_string).collect();
            blend_from_tokens(&tokens, &context, diag)
        }
        Value::Array(entries) => {
            let mut tokens = Vec::new();
            for (i, entry) in entries.iter().enumerate() {
                match entry.as_str() {
                    Some(token) if !token.trim().is_empty() => tokens.push(token.trim().to_string()),
                    Some(_) => {}
                    None => diag.error(format!("Invalid blend factor in {context} at index {i}.")),
                }
            }
            blend_from_tokens(&tokens, &context, diag)
        }
        Value::Table(blend) => {
            let src_color = read_string(blend, "src_color", &context, diag);
            let dst_color = read_string(blend, "dst_color", &context, diag);
            let src_alpha = read_string(blend, "src_alpha", &context, diag);
            let dst_alpha = read_string(blend, "dst_alpha", &context, diag);
            let (Some(src_color), Some(dst_color)) = (src_color, dst_color) else {
                diag.error(format!("Missing {context}.src_color/.dst_color"));
                return Some(BlendState::DISABLED);
            };
            let src_alpha = src_alpha.unwrap_or_else(|| src_color.clone());
            let dst_alpha = dst_alpha.unwrap_or_else(|| dst_color.clone());
            build_blend(&src_color, &dst_color, &src_alpha, &dst_alpha, &context, diag)
        }
        _ => {
            diag.error(format!("Invalid value for {context} (expected string, array, table or boolean)."));
            BlendState::DISABLED
        }
    })
}

fn blend_from_tokens(tokens: &[String], context: &str, diag: &mut Diagnostics) -> BlendState {
    match tokens {
        [] => BlendState::DISABLED,
        [single] => match single.to_ascii_lowercase().as_str() {
            "off" | "false" | "none" => BlendState::DISABLED,
            "on" | "true" => BlendState::ALPHA,
            _ => {
                diag.error(format!("Invalid blend token '{single}' in {context}."));
                BlendState::DISABLED
            }
        },
        [src, dst] => build_blend(src, dst, src, dst, context, diag),
        [src_color, dst_color, src_alpha, dst_alpha] => build_blend(src_color, dst_color, src_alpha, dst_alpha, context, diag),
        _ => {
            diag.error(format!("Invalid blend state in {context} (expected 'off', two factors or four factors)."));
            BlendState::DISABLED
        }
    }
}

fn build_blend(src_color: &str, dst_color: &str, src_alpha: &str, dst_alpha: &str, context: &str, diag: &mut Diagnostics) -> BlendState {
    let mut factor = |raw: &str| {
        if raw.trim().is_empty() {
            diag.error(format!("Missing blend factor in {context}."));
            return BlendFactor::One;
        }
        raw.parse::<BlendFactor>().unwrap_or_else(|()| {
            diag.error(format!("Unsupported blend factor '{raw}' in {context}."));
            BlendFactor::One
        })
    };
    BlendState {
        enabled: true,
        src_color: factor(src_color),
        dst_color: factor(dst_color),
        src_alpha: factor(src_alpha),
        dst_alpha: factor(dst_alpha),
    }
}

/// Splits on commas and whitespace, dropping empty tokens
pub(crate) fn split_tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| c == ',' || c.is_whitespace()).filter(|token| !token.is_empty()).collect()
}
