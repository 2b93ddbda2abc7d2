// 该文件是 Yanbei （雁北） 项目的一部分。
// src/label.rs - 标签映射（label map）解析与类别索引
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("标签文件读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签文件第 {line} 行语法错误: {message}")]
  Syntax { line: usize, message: String },
  #[error("第 {0} 行的 item 缺少 id 字段")]
  MissingId(usize),
  #[error("第 {0} 行的 item 缺少 name 字段")]
  MissingName(usize),
  #[error("类别 id 重复: {0}")]
  DuplicateId(i64),
  #[error("类别 id {0} 不在标签映射中")]
  UnknownClass(i64),
}

impl LabelError {
  fn syntax(line: usize, message: impl Into<String>) -> Self {
    LabelError::Syntax {
      line,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
  pub id: i64,
  /// 标签映射中的 `name`；缺失时取 `display_name`
  pub name: String,
  pub display_name: Option<String>,
}

impl Category {
  pub fn label(&self, use_display_name: bool) -> &str {
    match (&self.display_name, use_display_name) {
      (Some(display_name), true) => display_name,
      _ => &self.name,
    }
  }
}

/// 类别 id 到类别信息的只读映射
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
  categories: BTreeMap<i64, Category>,
  use_display_name: bool,
}

impl CategoryIndex {
  /// 读取 pbtxt 格式的标签映射文件
  ///
  /// `use_display_name` 为真时优先使用 `display_name`，缺失时回退到 `name`。
  pub fn from_labelmap<P: AsRef<Path>>(path: P, use_display_name: bool) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签映射: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let index = Self::parse(&text, use_display_name)?;
    debug!("标签映射包含 {} 个类别", index.len());
    Ok(index)
  }

  /// id 不大于 0 的条目（如 background）不进入索引
  pub fn parse(text: &str, use_display_name: bool) -> Result<Self, LabelError> {
    let tokens = tokenize(text)?;
    let items = parse_items(&tokens)?;

    let mut categories = BTreeMap::new();
    for item in items {
      let id = item.id.ok_or(LabelError::MissingId(item.line))?;
      if id <= 0 {
        debug!("忽略第 {} 行 id 为 {} 的类别", item.line, id);
        continue;
      }
      let (name, display_name) = match (item.name, item.display_name) {
        (Some(name), display_name) => (name, display_name),
        (None, Some(display_name)) => (display_name.clone(), Some(display_name)),
        (None, None) => return Err(LabelError::MissingName(item.line)),
      };
      let category = Category {
        id,
        name,
        display_name,
      };
      if categories.insert(id, category).is_some() {
        return Err(LabelError::DuplicateId(id));
      }
    }

    Ok(Self {
      categories,
      use_display_name,
    })
  }

  pub fn from_categories<I: IntoIterator<Item = Category>>(
    categories: I,
    use_display_name: bool,
  ) -> Self {
    Self {
      categories: categories.into_iter().map(|c| (c.id, c)).collect(),
      use_display_name,
    }
  }

  pub fn get(&self, id: i64) -> Option<&Category> {
    self.categories.get(&id)
  }

  /// 查询类别名称，未知 id 返回错误而不是空字符串
  pub fn name_of(&self, id: i64) -> Result<&str, LabelError> {
    self
      .categories
      .get(&id)
      .map(|c| c.label(self.use_display_name))
      .ok_or(LabelError::UnknownClass(id))
  }

  pub fn len(&self) -> usize {
    self.categories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.categories.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Category> {
    self.categories.values()
  }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Ident(String),
  Str(String),
  Number(String),
  Colon,
  Open,
  Close,
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, LabelError> {
  let mut tokens = Vec::new();
  let mut chars = text.chars().peekable();
  let mut line = 1;

  while let Some(&c) = chars.peek() {
    match c {
      '\n' => {
        line += 1;
        chars.next();
      }
      c if c.is_whitespace() || c == ',' || c == ';' => {
        chars.next();
      }
      '#' => {
        while let Some(&c) = chars.peek() {
          if c == '\n' {
            break;
          }
          chars.next();
        }
      }
      ':' => {
        tokens.push((line, Token::Colon));
        chars.next();
      }
      '{' | '<' => {
        tokens.push((line, Token::Open));
        chars.next();
      }
      '}' | '>' => {
        tokens.push((line, Token::Close));
        chars.next();
      }
      '"' | '\'' => {
        chars.next();
        let value = lex_string(&mut chars, c, line)?;
        tokens.push((line, Token::Str(value)));
      }
      c if c.is_ascii_digit() || c == '-' || c == '+' => {
        let mut value = String::new();
        while let Some(&c) = chars.peek() {
          if c.is_ascii_alphanumeric() || c == '-' || c == '+' || c == '.' {
            value.push(c);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push((line, Token::Number(value)));
      }
      c if c.is_alphabetic() || c == '_' => {
        let mut value = String::new();
        while let Some(&c) = chars.peek() {
          if c.is_alphanumeric() || c == '_' || c == '.' {
            value.push(c);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push((line, Token::Ident(value)));
      }
      other => {
        return Err(LabelError::syntax(line, format!("无法识别的字符 '{}'", other)));
      }
    }
  }

  Ok(tokens)
}

/// 读取引号之后的字符串内容，按 protobuf 文本格式解码转义（含 `\ooo` 与 `\xHH` 字节）
fn lex_string(
  chars: &mut Peekable<Chars<'_>>,
  quote: char,
  line: usize,
) -> Result<String, LabelError> {
  let mut bytes = Vec::new();
  loop {
    match chars.next() {
      Some('\\') => {
        let escaped = chars
          .next()
          .ok_or_else(|| LabelError::syntax(line, "字符串未结束"))?;
        match escaped {
          'n' => bytes.push(b'\n'),
          't' => bytes.push(b'\t'),
          'r' => bytes.push(b'\r'),
          'a' => bytes.push(0x07),
          'b' => bytes.push(0x08),
          'f' => bytes.push(0x0c),
          'v' => bytes.push(0x0b),
          '0'..='7' => {
            let mut value = escaped.to_digit(8).unwrap_or(0);
            for _ in 0..2 {
              match chars.peek().and_then(|c| c.to_digit(8)) {
                Some(digit) => {
                  value = value * 8 + digit;
                  chars.next();
                }
                None => break,
              }
            }
            let byte = u8::try_from(value)
              .map_err(|_| LabelError::syntax(line, format!("八进制转义超出范围: {}", value)))?;
            bytes.push(byte);
          }
          'x' | 'X' => {
            let mut value = 0u32;
            let mut digits = 0;
            while digits < 2 {
              match chars.peek().and_then(|c| c.to_digit(16)) {
                Some(digit) => {
                  value = value * 16 + digit;
                  digits += 1;
                  chars.next();
                }
                None => break,
              }
            }
            if digits == 0 {
              return Err(LabelError::syntax(line, "\\x 之后缺少十六进制数字"));
            }
            bytes.push(value as u8);
          }
          other => {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
          }
        }
      }
      Some(c) if c == quote => break,
      Some('\n') | None => return Err(LabelError::syntax(line, "字符串未结束")),
      Some(c) => {
        let mut buf = [0u8; 4];
        bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
      }
    }
  }
  String::from_utf8(bytes).map_err(|e| LabelError::syntax(line, format!("字符串不是有效的 UTF-8: {}", e)))
}

#[derive(Debug, Default)]
struct RawItem {
  line: usize,
  id: Option<i64>,
  name: Option<String>,
  display_name: Option<String>,
}

struct Parser<'a> {
  tokens: &'a [(usize, Token)],
  pos: usize,
}

impl<'a> Parser<'a> {
  fn peek(&self) -> Option<&'a Token> {
    self.tokens.get(self.pos).map(|(_, t)| t)
  }

  fn line(&self) -> usize {
    self
      .tokens
      .get(self.pos)
      .or_else(|| self.tokens.last())
      .map(|(l, _)| *l)
      .unwrap_or(1)
  }

  fn next(&mut self) -> Option<&'a Token> {
    let token = self.tokens.get(self.pos).map(|(_, t)| t);
    self.pos += 1;
    token
  }

  fn expect_ident(&mut self) -> Result<&'a str, LabelError> {
    let line = self.line();
    match self.next() {
      Some(Token::Ident(name)) => Ok(name),
      Some(other) => Err(LabelError::syntax(line, format!("期望字段名，得到 {:?}", other))),
      None => Err(LabelError::syntax(line, "文件意外结束")),
    }
  }

  /// 字段名之后是 `: 值`、`{ ... }` 或 `: { ... }`，返回 Some(值) 或表示块的 None
  fn field_value(&mut self) -> Result<Option<&'a Token>, LabelError> {
    if self.peek() == Some(&Token::Colon) {
      self.next();
    }
    let line = self.line();
    match self.peek() {
      Some(Token::Open) => {
        self.next();
        Ok(None)
      }
      Some(Token::Str(_)) | Some(Token::Number(_)) | Some(Token::Ident(_)) => Ok(self.next()),
      Some(other) => Err(LabelError::syntax(line, format!("期望字段值，得到 {:?}", other))),
      None => Err(LabelError::syntax(line, "文件意外结束")),
    }
  }

  /// 跳过一个已经读过 `{` 的块
  fn skip_block(&mut self) -> Result<(), LabelError> {
    let mut depth = 1usize;
    while depth > 0 {
      match self.next() {
        Some(Token::Open) => depth += 1,
        Some(Token::Close) => depth -= 1,
        Some(_) => {}
        None => return Err(LabelError::syntax(self.line(), "块未闭合")),
      }
    }
    Ok(())
  }

  fn item_body(&mut self, line: usize) -> Result<RawItem, LabelError> {
    let mut item = RawItem {
      line,
      ..Default::default()
    };

    loop {
      if self.peek() == Some(&Token::Close) {
        self.next();
        return Ok(item);
      }
      if self.peek().is_none() {
        return Err(LabelError::syntax(line, "item 块未闭合"));
      }

      let field_line = self.line();
      let field = self.expect_ident()?;
      let value = match self.field_value()? {
        Some(value) => value,
        None => {
          // keypoints 等嵌套块与类别索引无关
          self.skip_block()?;
          continue;
        }
      };

      match (field, value) {
        ("id", Token::Number(n)) => {
          let id = n
            .parse::<i64>()
            .map_err(|_| LabelError::syntax(field_line, format!("无效的 id: {}", n)))?;
          item.id = Some(id);
        }
        ("id", other) => {
          return Err(LabelError::syntax(field_line, format!("id 必须为整数，得到 {:?}", other)));
        }
        ("name", Token::Str(s)) => item.name = Some(s.clone()),
        ("display_name", Token::Str(s)) => item.display_name = Some(s.clone()),
        _ => {}
      }
    }
  }
}

fn parse_items(tokens: &[(usize, Token)]) -> Result<Vec<RawItem>, LabelError> {
  let mut parser = Parser { tokens, pos: 0 };
  let mut items = Vec::new();

  while parser.peek().is_some() {
    let line = parser.line();
    let field = parser.expect_ident()?;
    match parser.field_value()? {
      None if field == "item" => items.push(parser.item_body(line)?),
      None => parser.skip_block()?,
      Some(_) => {}
    }
  }

  Ok(items)
}
