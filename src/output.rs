// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output.rs - 输出定义
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

use image::ImageFormat;

pub mod draw;
pub mod record;

pub use self::draw::{AnnotatedImage, Draw, DrawError, DrawnBox, PixelRect};
pub use self::record::{IncidentRecord, LATEST_RECORD_ID, Record};

/// 标注图像在输出桶中的键
pub fn annotated_key(file_name: &str) -> String {
  format!("images/{file_name}")
}

/// 按扩展名沿用原图格式，无法识别时使用 PNG
pub fn output_format(file_name: &str) -> ImageFormat {
  match ImageFormat::from_path(file_name) {
    Ok(format) if format.can_write() => format,
    _ => ImageFormat::Png,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn format_follows_extension() {
    assert_eq!(output_format("a.JPG"), ImageFormat::Jpeg);
    assert_eq!(output_format("a.jpeg"), ImageFormat::Jpeg);
    assert_eq!(output_format("a.png"), ImageFormat::Png);
    assert_eq!(output_format("noext"), ImageFormat::Png);
    assert_eq!(annotated_key("a.png"), "images/a.png");
  }
}
