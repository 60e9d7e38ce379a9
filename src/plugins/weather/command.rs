/// 解析后的天气指令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 今日 [城市]
    Today(Option<String>),
    /// 五日 [城市]
    FiveDay(Option<String>),
    /// 绑定 <城市>
    Bind(Option<String>),
    /// 强制绑定 <城市>
    ForceBind(Option<String>),
    /// 解绑
    Unbind,
    /// 查绑
    ShowBinding,
    /// 去掉触发词后的原始文本
    Unknown(String),
}

impl Command {
    /// 是否属于绑定相关的指令（决定失败时使用的文案）
    pub fn is_binding(&self) -> bool {
        matches!(
            self,
            Command::Bind(_) | Command::ForceBind(_) | Command::Unbind | Command::ShowBinding
        )
    }
}

#[derive(Debug, Clone, Copy)]
enum Keyword {
    ForceBind,
    Bind,
    Today,
    FiveDay,
    Unbind,
    ShowBinding,
}

// "强制绑定" 必须排在 "绑定" 之前
const KEYWORDS: &[(&str, Keyword)] = &[
    ("强制绑定", Keyword::ForceBind),
    ("绑定", Keyword::Bind),
    ("今日", Keyword::Today),
    ("五日", Keyword::FiveDay),
    ("解绑", Keyword::Unbind),
    ("查绑", Keyword::ShowBinding),
];

/// 可用指令说明
pub const USAGE: &str = "/天气 今日 [城市]\n/天气 五日 [城市]\n/天气 绑定 城市\n/天气 强制绑定 城市\n/天气 解绑\n/天气 查绑";

/// 剥离开头的指令前缀（可重复，如 "//天气"）
pub fn strip_prefixes<'a>(content: &'a str, prefixes: &[String]) -> &'a str {
    let mut rest = content.trim_start();
    while let Some(stripped) = prefixes
        .iter()
        .filter(|p| !p.is_empty())
        .find_map(|p| rest.strip_prefix(p.as_str()))
    {
        rest = stripped.trim_start();
    }
    rest
}

/// 解析消息文本。不以触发词开头时返回 None，事件应交给其他插件。
/// 空触发词不匹配任何消息。
pub fn parse(text: &str, prefixes: &[String], trigger: &str) -> Option<Command> {
    if trigger.trim().is_empty() {
        return None;
    }
    let body = strip_prefixes(text, prefixes);
    let rest = body.strip_prefix(trigger)?.trim();
    Some(parse_subcommand(rest))
}

fn parse_subcommand(rest: &str) -> Command {
    for (word, keyword) in KEYWORDS {
        if let Some(args) = rest.strip_prefix(word) {
            let arg = argument(args);
            return match keyword {
                Keyword::ForceBind => Command::ForceBind(arg),
                Keyword::Bind => Command::Bind(arg),
                Keyword::Today => Command::Today(arg),
                Keyword::FiveDay => Command::FiveDay(arg),
                Keyword::Unbind => Command::Unbind,
                Keyword::ShowBinding => Command::ShowBinding,
            };
        }
    }
    Command::Unknown(rest.to_string())
}

fn argument(raw: &str) -> Option<String> {
    let arg = raw.trim();
    (!arg.is_empty()).then(|| arg.to_string())
}
