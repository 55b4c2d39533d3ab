//! Instruction text for the vision-language model.
//!
//! The prompt is a pure function of the detector output. Confidence values
//! are printed with a fixed precision so identical detections always produce
//! identical text.

use std::fmt::Write as _;

use crate::detect::DetectedObject;
use crate::equipment::MAX_DESCRIPTION_CHARS;

/// Discriminator value for claims that reference a detected object.
pub const SOURCE_DETECTOR: &str = "detector";
/// Discriminator value for claims that carry their own geometry.
pub const SOURCE_MODEL: &str = "model";

const ROLE: &str = "あなたは放送設備の専門家です。この画像に写っている放送機器を分析してください。";

const RISK_CRITERIA: &str = "\
リスクレベルの判定基準：
- DANGER: 高電圧機器、触ると危険なもの、本番系スイッチャー
- WARNING: 不明なケーブル、確認が必要なもの、識別できない機器
- SAFE: 安全に触れるもの、電源オフのもの、低電圧機器
- UNKNOWN: 機器を識別できない場合";

const PESSIMISTIC_RULES: &str = "\
重要な注意事項（悲観的AI戦略）：
1. 機器の種類が不明な場合は、推測せずに \"UNKNOWN\" を使用してください
2. ケーブルの種類が判断できない場合は、\"WARNING\" を使用し、説明に「不明なケーブル。触る前に確認してください」と記載してください
3. 少しでも不確実な場合は、安全側に倒して \"WARNING\" または \"DANGER\" を選択してください
4. バウンディングボックスの座標は、画像の左上を(0,0)、右下を(100,100)とするパーセンテージで表現してください
5. 説明は簡潔に、若手技術者が理解できる言葉で記載してください
6. 画像に機器が写っていない場合は、空の配列を返してください";

const OUTPUT_ONLY: &str = "JSON形式のみを返し、他の説明文は含めないでください。";

/// Build the instruction text for one image.
///
/// With no detections the model is asked for freeform claims only.
pub fn build_prompt(objects: &[DetectedObject]) -> String {
    let mut out = String::new();
    out.push_str(ROLE);
    out.push_str("\n\n");

    if objects.is_empty() {
        out.push_str("事前の物体検出結果はありません。画像全体から放送機器を探してください。\n\n");
    } else {
        out.push_str("物体検出モデルが以下の物体を検出しました（番号は0始まり）：\n");
        for (index, object) in objects.iter().enumerate() {
            let _ = writeln!(
                out,
                "[{}] {} (信頼度 {:.1}%)",
                index,
                single_line(&object.label),
                object.confidence
            );
        }
        out.push_str(
            "\n各物体について放送機器かどうかを判定し、放送機器であるものだけを \
             \"source\": \"detector\" と \"object_index\"（上の番号）を付けて報告してください。\
             放送機器でない物体は含めないでください。\n\
             上の一覧に含まれていない放送機器が写っている場合は、\
             \"source\": \"model\" と独自のバウンディングボックスを付けて追加で報告してください。\n\n",
        );
    }

    out.push_str("以下の情報をJSON形式で返してください：\n");
    out.push_str(&output_schema(!objects.is_empty()));
    out.push('\n');
    out.push_str(RISK_CRITERIA);
    out.push_str("\n\n");
    out.push_str(PESSIMISTIC_RULES);
    let _ = writeln!(
        out,
        "\n7. 説明は{}文字以内にしてください",
        MAX_DESCRIPTION_CHARS / 2
    );
    out.push('\n');
    out.push_str(OUTPUT_ONLY);
    out
}

fn output_schema(with_detections: bool) -> String {
    let freeform = format!(
        r#"    {{
      "source": "{SOURCE_MODEL}",
      "name": "機器名（日本語）",
      "bbox": {{
        "x": X座標（パーセンテージ 0-100）,
        "y": Y座標（パーセンテージ 0-100）,
        "width": 幅（パーセンテージ 0-100）,
        "height": 高さ（パーセンテージ 0-100）
      }},
      "risk_level": "SAFE | WARNING | DANGER | UNKNOWN",
      "description": "簡潔な説明（日本語）"
    }}"#
    );
    if !with_detections {
        return format!("{{\n  \"equipment\": [\n{freeform}\n  ]\n}}\n");
    }
    let indexed = format!(
        r#"    {{
      "source": "{SOURCE_DETECTOR}",
      "object_index": 検出物体の番号,
      "name": "機器名（日本語）",
      "risk_level": "SAFE | WARNING | DANGER | UNKNOWN",
      "description": "簡潔な説明（日本語）"
    }}"#
    );
    format!("{{\n  \"equipment\": [\n{indexed},\n{freeform}\n  ]\n}}\n")
}

fn single_line(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ")
}
