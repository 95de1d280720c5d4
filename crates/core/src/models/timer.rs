use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use cron::Schedule;

use crate::{OrchestratorError, OrchestratorResult};

/// 定时表达式
///
/// 支持 6 段（带秒）与 5 段 cron 表达式、`@hourly` 等描述符，以及 `@every 1h30m` 形式的固定间隔。
#[derive(Debug, Clone)]
pub enum Timer {
    Cron(Box<Schedule>),
    Every(TimeDelta),
}

impl Timer {
    pub fn parse(expr: &str) -> OrchestratorResult<Self> {
        let expr = expr.trim();
        let invalid = |message: String| OrchestratorError::InvalidCron {
            expr: expr.to_string(),
            message,
        };

        if let Some(rest) = expr.strip_prefix("@every") {
            let every = parse_duration(rest.trim()).map_err(invalid)?;
            return Ok(Timer::Every(every));
        }

        let normalized = match expr {
            "@yearly" | "@annually" => "0 0 0 1 1 *".to_string(),
            "@monthly" => "0 0 0 1 * *".to_string(),
            "@weekly" => "0 0 0 * * Sun".to_string(),
            "@daily" | "@midnight" => "0 0 0 * * *".to_string(),
            "@hourly" => "0 0 * * * *".to_string(),
            _ if expr.split_whitespace().count() == 5 => format!("0 {expr}"),
            _ => expr.to_string(),
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;
        Ok(Timer::Cron(Box::new(schedule)))
    }

    /// `from` 之后的下一次触发时间
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Timer::Cron(schedule) => schedule.after(&from).next(),
            Timer::Every(every) => from.checked_add_signed(*every),
        }
    }
}

/// 解析 Go 风格的时长，例如 `30m`、`1h30m`、`10s`、`500ms`
fn parse_duration(text: &str) -> Result<TimeDelta, String> {
    if text.is_empty() {
        return Err("缺少间隔时长".to_string());
    }
    let out_of_range = || format!("时长超出范围: {text}");

    let mut total = TimeDelta::zero();
    let mut rest = text;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("无效的时长: {text}"));
        }
        let value: i64 = rest[..digits].parse().map_err(|_| out_of_range())?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => TimeDelta::try_milliseconds(value),
            "s" => TimeDelta::try_seconds(value),
            "m" => TimeDelta::try_minutes(value),
            "h" => TimeDelta::try_hours(value),
            unit => return Err(format!("不支持的时长单位: {unit:?}")),
        };
        total = part
            .and_then(|part| total.checked_add(&part))
            .ok_or_else(out_of_range)?;
        rest = &rest[unit_len..];
    }

    if total <= TimeDelta::zero() {
        return Err("间隔必须大于0".to_string());
    }
    Ok(total)
}
