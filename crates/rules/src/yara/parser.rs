//! YARA 규칙 파서 -- 문자 단위 상태 기계
//!
//! # 상태
//! ```text
//! SeekIdentifier ──`rule X {`──▶ WatchForHeader ──`meta:`──▶ InSection
//!       ▲                              ▲                        │
//!       │                              └────── 새 헤더 ─────────┤
//!       └──────────────────── `}` (규칙 종료) ──────────────────┘
//! ```
//!
//! 주석(`//`, `/* */`)과 따옴표/중괄호 문자열 안의 문자는 상태 전이를
//! 일으키지 않습니다. 섹션 헤더가 감지되면 같은 문자를 새 상태에서
//! 다시 평가합니다.

use std::mem;

use tracing::debug;

use super::imports::ImportCheckers;
use super::rule::YaraRule;
use crate::error::RuleParseError;
use crate::filter::RuleFilter;

/// 식별자 최대 길이
const MAX_IDENTIFIER_LEN: usize = 128;

/// 따옴표/주석 밖임을 나타내는 표식
const NONE: char = ' ';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    SeekIdentifier,
    WatchForHeader,
    InSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Meta,
    Strings,
    Condition,
}

impl Section {
    fn from_header(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "meta" => Some(Self::Meta),
            "strings" => Some(Self::Strings),
            "condition" => Some(Self::Condition),
            _ => None,
        }
    }
}

/// 텍스트에서 YARA 규칙을 모두 파싱합니다.
///
/// `filter`가 주어지면 닫힌 규칙의 원문에 허용/거부 정규식을 적용해
/// 통과한 규칙만 반환합니다.
pub fn parse_rules(
    raw: &str,
    filter: Option<&RuleFilter>,
) -> Result<Vec<YaraRule>, RuleParseError> {
    let mut parser = Parser::new(filter);
    let mut last = ' ';
    let mut comment = NONE;

    for (offset, c) in raw.char_indices() {
        parser.rule.src.push(c);

        if c == '\r' {
            continue;
        }

        if (comment == '*' && last == '*' && c == '/') || (comment == '/' && c == '\n') {
            comment = NONE;
            if last == '*' {
                last = c;
                continue;
            }
        }

        if last == '/'
            && (c == '/' || c == '*')
            && (parser.quote == NONE || parser.quote == '/')
            && comment == NONE
        {
            comment = c;
            parser.quote = NONE;
            if parser.buffer.ends_with('/') {
                parser.buffer.pop();
            }
        }

        if comment != NONE {
            last = c;
            continue;
        }

        parser.step(offset, c, last)?;

        // 문자열 안의 이스케이프된 `\` 또는 `/`는 다음 문자의 이스케이프로 보지 않음
        last = if (c == '\\' || c == '/') && last == '\\' && parser.quote != NONE {
            ' '
        } else {
            c
        };
    }

    parser.finish()
}

struct Parser<'a> {
    filter: Option<&'a RuleFilter>,
    rules: Vec<YaraRule>,
    rule: YaraRule,
    state: ParseState,
    section: Option<Section>,
    buffer: String,
    /// 현재 문자열의 닫는 문자 (`'`, `"`, `}`, `/`) 또는 NONE
    quote: char,
    imports: ImportCheckers,
}

impl<'a> Parser<'a> {
    fn new(filter: Option<&'a RuleFilter>) -> Self {
        Self {
            filter,
            rules: Vec::new(),
            rule: YaraRule::default(),
            state: ParseState::SeekIdentifier,
            section: None,
            buffer: String::new(),
            quote: NONE,
            imports: ImportCheckers::default(),
        }
    }

    fn step(&mut self, offset: usize, c: char, last: char) -> Result<(), RuleParseError> {
        loop {
            match self.state {
                ParseState::SeekIdentifier => {
                    match c {
                        '\n' => self.capture_import(),
                        '{' => self.open_rule(offset)?,
                        _ => self.buffer.push(c),
                    }
                    return Ok(());
                }
                ParseState::WatchForHeader => {
                    let trimmed = self.buffer.trim();
                    if c == '\n' && trimmed.ends_with(':') {
                        let name = trimmed.trim_end_matches(':').trim().to_lowercase();
                        self.enter_section(offset, &name)?;
                    } else if c == ':' && Section::from_header(trimmed).is_some() {
                        let name = trimmed.to_owned();
                        self.enter_section(offset, &name)?;
                    } else {
                        self.buffer.push(c);
                    }
                    return Ok(());
                }
                ParseState::InSection => {
                    if c == '\n' {
                        let line = self.buffer.trim();
                        if line.ends_with(':') && !line.starts_with("for ") {
                            self.state = ParseState::WatchForHeader;
                            continue;
                        }
                        self.commit_line(offset)?;
                    } else if c == ':'
                        && self.quote == NONE
                        && Section::from_header(&self.buffer).is_some()
                    {
                        self.state = ParseState::WatchForHeader;
                        continue;
                    } else if c == '}'
                        && (self.quote == NONE
                            || (self.quote != '}' && self.buffer.trim().is_empty()))
                    {
                        self.commit_line(offset)?;
                        self.close_rule();
                    } else {
                        self.buffer.push(c);
                        self.track_quote(c, last);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// `import "x"` 줄이면 현재 규칙과 파일 import 목록에 기록합니다.
    fn capture_import(&mut self) {
        let Some(rest) = self.buffer.trim_start().strip_prefix("import ") else {
            return;
        };
        let module = rest.trim().trim_matches('"').to_owned();

        self.imports.register(&module);
        self.rule.imports.push(module);
        self.buffer.clear();
    }

    /// `rule X {`, `private rule X : tag {` 헤더에서 식별자를 추출합니다.
    fn open_rule(&mut self, offset: usize) -> Result<(), RuleParseError> {
        let mut header = self.buffer.trim();

        if let Some(rest) = header.strip_prefix("private ") {
            self.rule.is_private = true;
            header = rest.trim();
        }

        if header
            .get(..4)
            .is_some_and(|p| p.eq_ignore_ascii_case("rule"))
        {
            header = header[4..].trim();
        }

        // 상속 표기 `rule This : That` 는 식별자만 남김
        if let Some((name, _)) = header.split_once(':') {
            header = name.trim();
        }

        if header.is_empty() {
            return Err(RuleParseError::MissingIdentifier { offset });
        }
        if !is_valid_identifier(header) {
            return Err(RuleParseError::UnexpectedIdentifierChar { offset });
        }

        self.rule.identifier = header.to_owned();
        self.buffer.clear();
        self.state = ParseState::WatchForHeader;
        Ok(())
    }

    fn enter_section(&mut self, offset: usize, name: &str) -> Result<(), RuleParseError> {
        let section = Section::from_header(name).ok_or_else(|| RuleParseError::UnexpectedHeader {
            offset,
            header: name.to_owned(),
        })?;

        self.section = Some(section);
        self.buffer.clear();
        self.state = ParseState::InSection;
        Ok(())
    }

    /// 버퍼의 한 줄을 현재 섹션에 반영합니다.
    fn commit_line(&mut self, offset: usize) -> Result<(), RuleParseError> {
        let line = mem::take(&mut self.buffer);
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        match self.section {
            Some(Section::Meta) => {
                let (key, value) =
                    line.split_once('=')
                        .ok_or_else(|| RuleParseError::InvalidMeta {
                            offset,
                            line: line.to_owned(),
                        })?;
                self.rule.meta.set(key.trim(), value.trim());
            }
            Some(Section::Strings) => self.rule.strings.push(line.to_owned()),
            Some(Section::Condition) => {
                let joined = format!("{} {}", self.rule.condition, line);
                self.rule.condition = joined.trim().to_owned();
            }
            None => {}
        }
        Ok(())
    }

    fn track_quote(&mut self, c: char, last: char) {
        if matches!(c, '\'' | '"' | '{' | '/') && last != '\\' && self.quote == NONE {
            self.quote = if c == '{' { '}' } else { c };
        } else if self.quote != NONE && c == self.quote && last != '\\' {
            self.quote = NONE;
        }
    }

    fn close_rule(&mut self) {
        let mut rule = mem::take(&mut self.rule);
        rule.src = rule.src.trim().to_owned();

        let keep = self.filter.is_none_or(|f| f.keep(&rule.src));
        if keep {
            self.imports.add_missing(&mut rule);
            self.rules.push(rule);
        } else {
            debug!(rule_identifier = %rule.identifier, "yara rule filtered out");
        }

        self.buffer.clear();
        self.state = ParseState::SeekIdentifier;
        self.section = None;
        self.quote = NONE;
    }

    fn finish(self) -> Result<Vec<YaraRule>, RuleParseError> {
        if self.state != ParseState::SeekIdentifier || !self.buffer.trim().is_empty() {
            return Err(RuleParseError::UnexpectedEnd);
        }
        Ok(self.rules)
    }
}

/// 영문자/밑줄로 시작하고 영숫자/밑줄만 포함하는 128자 이하 식별자
fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && name.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
