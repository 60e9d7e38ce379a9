//! 回复文案。

use std::fmt::Write;
use std::time::Duration;

use super::command::USAGE;
use super::provider::{CurrentWeather, Forecast, WeatherError};

pub fn today(w: &CurrentWeather) -> String {
    format!(
        "⛅天气数据\n\
         🏙️当前城市：{}/{}\n\
         ⛅当前天气：{}/{}\n\
         🧭当前风速：{} {}\n\
         🌡️当前温度：{}°C\n\
         💦当前湿度：{}\n\
         ⚖️大气压强：{}\n\
         🏭空气指数：{}(PM2.5指数：{})\n\
         ⏰更新时间：{} {}",
        w.city,
        w.city_english,
        w.weather,
        w.weather_english,
        w.wind,
        w.wind_speed,
        w.temp,
        w.humidity,
        w.pressure,
        w.air,
        w.air_pm25,
        w.date,
        w.time
    )
}

pub fn five_day(f: &Forecast) -> String {
    let mut msg = format!("⛅{} 的未来五日天气预报\n", f.city);
    for day in &f.forecast {
        let _ = write!(
            msg,
            "\n📆{}   {}\n早 {} 晚 {}\n早 {}  晚 {}\n湿度 {} 空气质量{}\n",
            day.date,
            day.temperature,
            day.day_weather,
            day.night_weather,
            day.wind_day,
            day.wind_night,
            day.humidity,
            day.air_quality
        );
    }
    msg
}

pub fn query_error(err: &WeatherError) -> String {
    match err {
        WeatherError::Status(code) => {
            format!("🔴天气查询失败\n错误码：{}\n错误原因：API状态码错误", code)
        }
        WeatherError::Api { code, message } => format!(
            "🔴天气API返回错误\n错误码：{}\n错误原因：{}\n请尝试重新获取。",
            code, message
        ),
        other => internal_error(other),
    }
}

pub fn internal_error(err: &dyn std::fmt::Display) -> String {
    format!(
        "🔴天气查询失败\n错误原因：{}\n请尝试重新获取。如有问题，请及时上报管理员。",
        err
    )
}

pub fn need_city() -> String {
    "您还没有绑定默认城市，请使用'/天气 绑定 城市名称'绑定，或在命令后加上城市名称".to_string()
}

pub fn bind_usage() -> String {
    "请提供要绑定的城市名称，例如：/天气 绑定 北京".to_string()
}

pub fn force_bind_usage() -> String {
    "请提供要强制绑定的城市名称，例如：/天气 强制绑定 北京".to_string()
}

pub fn bound(city: &str) -> String {
    format!(
        "成功绑定您的默认城市为: {}\n以后可以直接使用'/天气 今日'或'/天气 五日'来查询",
        city
    )
}

pub fn rejected(city: &str, message: &str, window: Duration) -> String {
    format!(
        "城市「{}」校验失败：{}\n如确认城市无误，请在{}内发送 '/天气 强制绑定 {}' 强制绑定",
        city,
        message,
        human_duration(window),
        city
    )
}

pub fn superseded(city: &str) -> String {
    format!("城市「{}」的绑定请求已被更新的请求取代", city)
}

pub fn bind_cancelled(city: &str) -> String {
    format!("城市「{}」的绑定请求已取消，未保存绑定", city)
}

pub fn validated_too_late(city: &str) -> String {
    format!(
        "城市「{}」校验完成时绑定请求已超时，未保存绑定，请重新使用 '/天气 绑定 {}'",
        city, city
    )
}

pub fn already_force_bound(city: &str) -> String {
    format!("城市「{}」已通过强制绑定保存", city)
}

pub fn force_bound(city: &str) -> String {
    format!("已强制绑定您的默认城市为: {}", city)
}

pub fn no_pending() -> String {
    "没有待确认的绑定请求，请先使用 '/天气 绑定 城市名称' 发起绑定".to_string()
}

pub fn mismatch(city: &str, pending: &str) -> String {
    format!(
        "强制绑定的城市「{}」与待确认的城市「{}」不一致",
        city, pending
    )
}

pub fn expired(pending: &str) -> String {
    format!(
        "城市「{}」的绑定请求已超时失效，请重新使用 '/天气 绑定 {}' 发起绑定",
        pending, pending
    )
}

pub fn timed_out(city: &str) -> String {
    format!(
        "⌛城市「{}」的绑定请求已超时，如需绑定请重新发送 '/天气 绑定 {}'",
        city, city
    )
}

pub fn bind_failed(err: &dyn std::fmt::Display) -> String {
    format!("绑定城市失败: {}", err)
}

pub fn show_bound(city: &str) -> String {
    format!("您当前绑定的城市为：{}", city)
}

pub fn nothing_bound() -> String {
    "目前没有绑定城市".to_string()
}

pub fn pending_hint(city: &str, remaining: Duration) -> String {
    format!(
        "待确认的绑定请求：{}（{}内可强制绑定）",
        city,
        human_duration(remaining)
    )
}

pub fn unbound(city: &str) -> String {
    format!("成功删除当前绑定的城市：{}", city)
}

pub fn unknown(text: &str) -> String {
    format!("触发未知命令：{}\n可用命令：\n{}", text, USAGE)
}

/// 300s -> "5分钟"，90s -> "1分30秒"
fn human_duration(d: Duration) -> String {
    let secs = d.as_secs();
    match (secs / 60, secs % 60) {
        (0, s) => format!("{}秒", s),
        (m, 0) => format!("{}分钟", m),
        (m, s) => format!("{}分{}秒", m, s),
    }
}
