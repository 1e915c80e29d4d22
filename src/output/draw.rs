// 该文件是 Shaowang （哨望） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use std::io::Cursor;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rand::Rng;
use thiserror::Error;
use tracing::debug;

use crate::detect::{BoundingBox, Label};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: u32 = 20;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 没有字体时按每字符平均宽度估算
const LABEL_PADDING: u32 = 2;
const BOX_STROKE_WIDTH: u32 = 4;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  FontIo(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

/// 像素坐标，右下角为开区间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
  pub x: i32,
  pub y: i32,
  pub width: u32,
  pub height: u32,
}

impl PixelRect {
  fn to_rect(self) -> Rect {
    Rect::at(self.x, self.y).of_size(self.width, self.height)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawnBox {
  pub label: String,
  pub confidence: f32,
  pub bbox: PixelRect,
  pub tag: PixelRect,
  pub color: [u8; 3],
}

/// 本次调用内有效，上传后丢弃
#[derive(Debug, Clone)]
pub struct AnnotatedImage {
  pub image: RgbImage,
  pub boxes: Vec<DrawnBox>,
}

impl AnnotatedImage {
  pub fn encode(&self, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    self.image.write_to(&mut Cursor::new(&mut buf), format)?;
    Ok(buf)
  }
}

pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: u32,
  label_char_width: f32,
  label_padding: u32,
  stroke_width: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_padding: LABEL_PADDING,
      stroke_width: BOX_STROKE_WIDTH,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    Ok(Self {
      font: Some(FontVec::try_from_vec(data)?),
      ..Self::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn text_extent(&self, text: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => text_size(PxScale::from(self.font_size), font, text),
      None => (
        (text.chars().count() as f32 * self.label_char_width) as u32,
        self.label_text_height,
      ),
    }
  }

  /// 归一化坐标转像素坐标并裁剪到图像内；面积为零时返回 None
  fn to_pixels(bbox: &BoundingBox, width: u32, height: u32) -> Option<PixelRect> {
    let (w, h) = (width as f32, height as f32);
    let x1 = ((bbox.left * w) as i32).clamp(0, width as i32);
    let y1 = ((bbox.top * h) as i32).clamp(0, height as i32);
    let x2 = (((bbox.left + bbox.width) * w) as i32).clamp(0, width as i32);
    let y2 = (((bbox.top + bbox.height) * h) as i32).clamp(0, height as i32);

    if x1 >= x2 || y1 >= y2 {
      return None;
    }
    Some(PixelRect {
      x: x1,
      y: y1,
      width: (x2 - x1) as u32,
      height: (y2 - y1) as u32,
    })
  }

  fn draw_bbox_with_label(
    &self,
    image: &mut RgbImage,
    bbox: PixelRect,
    name: &str,
    color: [u8; 3],
  ) -> PixelRect {
    // 边框向内加粗
    for t in 0..self.stroke_width {
      let inset = t as i32;
      let (w, h) = (
        bbox.width.saturating_sub(2 * t),
        bbox.height.saturating_sub(2 * t),
      );
      if w == 0 || h == 0 {
        break;
      }
      let rect = Rect::at(bbox.x + inset, bbox.y + inset).of_size(w, h);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }

    let (text_w, text_h) = self.text_extent(name);
    let tag_height = text_h + 2 * self.label_padding;
    let max_width = image.width().saturating_sub(bbox.x as u32).max(1);
    let tag_width = (text_w + 2 * self.label_padding).min(max_width);

    // 标签放在边框上方；上方空间不够时放到上边沿下方
    let tag_y = if (bbox.y as u32) < tag_height {
      bbox.y
    } else {
      bbox.y - tag_height as i32
    };
    let tag = PixelRect {
      x: bbox.x,
      y: tag_y,
      width: tag_width,
      height: tag_height,
    };
    draw_filled_rect_mut(image, tag.to_rect(), Rgb(color));

    if let Some(font) = &self.font {
      let text_x = tag.x + (tag_width.saturating_sub(text_w) / 2) as i32;
      let text_y = tag.y + (tag_height.saturating_sub(text_h) / 2) as i32;
      draw_text_mut(
        image,
        TEXT_COLOR,
        text_x,
        text_y,
        PxScale::from(self.font_size),
        font,
        name,
      );
    }
    tag
  }

  /// 只绘制置信度严格大于阈值的实例，颜色随机
  pub fn render(&self, source: &RgbImage, labels: &[Label], min_confidence: f32) -> AnnotatedImage {
    let mut image = source.clone();
    let mut boxes = Vec::new();
    let mut rng = rand::thread_rng();
    let (width, height) = image.dimensions();

    for label in labels {
      for instance in &label.instances {
        if instance.confidence <= min_confidence {
          continue;
        }
        let Some(bbox) = Self::to_pixels(&instance.bounding_box, width, height) else {
          debug!("跳过空的边框: {} {:?}", label.name, instance.bounding_box);
          continue;
        };

        let color = [rng.r#gen::<u8>(), rng.r#gen(), rng.r#gen()];
        let tag = self.draw_bbox_with_label(&mut image, bbox, &label.name, color);
        boxes.push(DrawnBox {
          label: label.name.clone(),
          confidence: instance.confidence,
          bbox,
          tag,
          color,
        });
      }
    }

    AnnotatedImage { image, boxes }
  }
}
