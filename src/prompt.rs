//! # prompt — สร้าง Prompt สำหรับ AI
//!
//! Both prompts force a single JSON object back; the classifier still
//! tolerates fences and relaxed syntax because models ignore instructions.

use crate::models::TradeDirective;

/// First-stage prompt: free-text channel post → `TradeDirective` JSON.
pub fn classification_prompt(message: &str) -> String {
    format!(r#"(YOU SPEAK ONLY JSON) You are an expert trading assistant. Analyze the following message from a trading signal channel and extract key information.

Respond with a single JSON object containing the following fields:
- action: "open_trade", "update_trade", "breakeven", "close_trade", or "none" when the message is not an instruction
- symbol: the trading symbol, e.g. "XAUUSD"
- direction: "buy" or "sell"
- entry: entry price or price range (a single number, or an object with "min" and "max")
- stop_loss: stop loss price, or null
- take_profit: take profit price(s) (a single number, an array, or an object with "tp1", "tp2", ...), or null
- comment: any additional information

No explanations, no markdown, no code fences.

Message:
{message}
"#)
}

/// Second-stage prompt used for `update_trade`: extract only new SL / TP.
pub fn update_prompt(message: &str, directive: &TradeDirective) -> String {
    let first_pass = serde_json::to_string(directive).unwrap_or_default();

    format!(r#"You are a JSON writer expert. You will receive a message about an existing trade and your role is to extract the new protective levels (YOU SPEAK ONLY JSON).

Here's how the JSON structure should look:

{{
  "stop_loss": <float or null>,
  "take_profit": <float, [tp1, tp2], or null>
}}

Rules:
1. When two take profit targets are given, return them as a two-element array, nearest target first
2. Use null for any level the message does not change

Preliminary reading:
{first_pass}

Message:
{message}
"#)
}
