use std::path::Path;

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{ImageFormat, Rgb, RgbImage};
use tracing::{debug, info};

use crate::{AggregateReport, Month, ProjectUsage};

/// Possible errors while rendering a plot
#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("Failed to write plot: {0}")]
    Image(#[from] image::ImageError),
}

const WIDTH: u32 = 800;
const PANEL_HEIGHT: u32 = 600;
const MARGIN: u32 = 60;
const LEFT_MARGIN: u32 = 90;
const RIGHT_MARGIN: u32 = 30;
const GRID_LINES: u32 = 5;
const MARKER: i64 = 3;
/// Glyph size of the bitmap font, in pixels
const GLYPH: i64 = 8;
const MAX_X_LABELS: usize = 6;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const GRID: Rgb<u8> = Rgb([220, 220, 220]);
const PALETTE: [Rgb<u8>; 10] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
    Rgb([148, 103, 189]),
    Rgb([140, 86, 75]),
    Rgb([227, 119, 194]),
    Rgb([127, 127, 127]),
    Rgb([188, 189, 34]),
    Rgb([23, 190, 207]),
];

/// One line of a panel
struct Series {
    label: String,
    color: Rgb<u8>,
    points: Vec<Option<f64>>,
}

/// The content of one panel
struct Chart {
    title: String,
    legend: &'static str,
    series: Vec<Series>,
}

/// Renders accumulated usage and accumulated percentage per project as PNG
pub fn render_plot(report: &AggregateReport, path: &Path) -> Result<(), PlotError> {
    draw(report).save_with_format(path, ImageFormat::Png)?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Draws two stacked panels, accumulated SBUs on top and accumulated
/// percentage of the requested SBUs below
///
/// Every project keeps its color in both panels. Projects without a quota
/// are left out of the lower panel.
pub fn draw(report: &AggregateReport) -> RgbImage {
    let mut image = RgbImage::from_pixel(WIDTH, 2 * PANEL_HEIGHT, WHITE);
    let period = match (report.months().first(), report.months().last()) {
        (Some(first), Some(last)) if first != last => format!("{} to {}", first, last),
        (Some(first), _) => first.to_string(),
        _ => String::new(),
    };

    let mut usage = Chart {
        title: format!("Accumulated SBU usage (hours) {}", period),
        legend: "Project (PI): SBU",
        series: Vec::new(),
    };
    let mut percentage = Chart {
        title: format!("Accumulated % SBU usage {}", period),
        legend: "Project (PI): % SBU",
        series: Vec::new(),
    };
    for (i, project) in report.projects().iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        debug!(
            "Plotting {} as #{:02x}{:02x}{:02x}",
            project.name(),
            color.0[0],
            color.0[1],
            color.0[2],
        );

        usage.series.push(Series {
            label: legend_label(project),
            color,
            points: project
                .accumulated()
                .into_iter()
                .map(|sbu| Some(sbu.to_num::<f64>()))
                .collect(),
        });
        if project.requested().is_some() {
            percentage.series.push(Series {
                label: legend_label(project),
                color,
                points: project.accumulated_percentage(),
            });
        }
    }

    Panel::new(0).draw(&mut image, &usage, report.months());
    Panel::new(PANEL_HEIGHT).draw(&mut image, &percentage, report.months());
    image
}

/// `name (PI)`, or just the name without a PI
fn legend_label(project: &ProjectUsage) -> String {
    match project.pi() {
        Some(pi) => format!("{} ({})", project.name(), pi),
        None => project.name().to_owned(),
    }
}

/// The plotting area of one panel
struct Panel {
    offset: i64,
    left: i64,
    top: i64,
    width: i64,
    height: i64,
}

impl Panel {
    fn new(offset: u32) -> Self {
        Self {
            offset: i64::from(offset),
            left: i64::from(LEFT_MARGIN),
            top: i64::from(offset + MARGIN),
            width: i64::from(WIDTH - LEFT_MARGIN - RIGHT_MARGIN),
            height: i64::from(PANEL_HEIGHT - 2 * MARGIN),
        }
    }

    fn bottom(&self) -> i64 {
        self.top + self.height
    }

    fn right(&self) -> i64 {
        self.left + self.width
    }

    fn draw(&self, image: &mut RgbImage, chart: &Chart, months: &[Month]) {
        let max = chart
            .series
            .iter()
            .flat_map(|series| series.points.iter().flatten())
            .fold(0.0_f64, |max, &value| max.max(value));
        let limit = axis_limit(max);

        let scale = match text_width(&chart.title, 2) <= self.width {
            true => 2,
            false => 1,
        };
        let title_x = self.left + (self.width - text_width(&chart.title, scale)) / 2;
        draw_text(image, &chart.title, (title_x, self.offset + 20), scale, BLACK);

        for line in 0..=GRID_LINES {
            let y = self.bottom() - self.height * i64::from(line) / i64::from(GRID_LINES);
            if line > 0 {
                draw_line(image, (self.left, y), (self.right(), y), GRID);
            }
            let label = tick_label(limit * f64::from(line) / f64::from(GRID_LINES), limit);
            let x = self.left - GLYPH - text_width(&label, 1);
            draw_text(image, &label, (x, y - GLYPH / 2), 1, BLACK);
        }
        draw_line(image, (self.left, self.top), (self.left, self.bottom()), BLACK);
        draw_line(image, (self.left, self.bottom()), (self.right(), self.bottom()), BLACK);

        let step = (months.len() / MAX_X_LABELS).max(1);
        for (i, month) in months.iter().enumerate() {
            let x = self.x(i, months.len());
            draw_line(image, (x, self.bottom()), (x, self.bottom() + MARKER * 2), BLACK);
            if i % step == 0 {
                let label = month.to_string();
                let y = self.bottom() + MARKER * 2 + 4;
                draw_text(image, &label, (x - text_width(&label, 1) / 2, y), 1, BLACK);
            }
        }

        for series in &chart.series {
            let mut previous = None;
            for (month, value) in series.points.iter().enumerate() {
                let point = value.map(|value| (self.x(month, months.len()), self.y(value, limit)));
                if let (Some(from), Some(to)) = (previous, point) {
                    draw_line(image, from, to, series.color);
                }
                if let Some((x, y)) = point {
                    fill_rect(image, x - MARKER, y - MARKER, 2 * MARKER + 1, series.color);
                }
                previous = point;
            }
        }

        self.draw_legend(image, chart);
    }

    /// A boxed legend in the top left corner of the plotting area
    fn draw_legend(&self, image: &mut RgbImage, chart: &Chart) {
        const PADDING: i64 = 6;
        const ROW: i64 = GLYPH + 6;

        let text_left = GLYPH + PADDING;
        let width = chart
            .series
            .iter()
            .map(|series| text_left + text_width(&series.label, 1))
            .chain([text_width(chart.legend, 1)])
            .max()
            .unwrap_or_default()
            + 2 * PADDING;
        let height = ROW * (chart.series.len() as i64 + 1) + PADDING;
        let (x, y) = (self.left + PADDING, self.top + PADDING);

        fill_area(image, x, y, width, height, WHITE);
        draw_line(image, (x, y), (x + width, y), GRID);
        draw_line(image, (x, y + height), (x + width, y + height), GRID);
        draw_line(image, (x, y), (x, y + height), GRID);
        draw_line(image, (x + width, y), (x + width, y + height), GRID);

        draw_text(image, chart.legend, (x + PADDING, y + PADDING), 1, BLACK);
        for (i, series) in chart.series.iter().enumerate() {
            let row = y + PADDING + ROW * (i as i64 + 1);
            fill_rect(image, x + PADDING, row, GLYPH, series.color);
            draw_text(image, &series.label, (x + PADDING + text_left, row), 1, BLACK);
        }
    }

    fn x(&self, month: usize, months: usize) -> i64 {
        match months {
            0 | 1 => self.left + self.width / 2,
            _ => self.left + self.width * month as i64 / (months as i64 - 1),
        }
    }

    fn y(&self, value: f64, limit: f64) -> i64 {
        let fraction = (value / limit).clamp(0.0, 1.0);
        self.bottom() - (fraction * self.height as f64).round() as i64
    }
}

/// Rounds `max` to its leading digit and adds one step of that digit
fn axis_limit(max: f64) -> f64 {
    if !max.is_finite() || max <= 0.0 {
        return 1.0;
    }
    let step = 10_f64.powi(max.log10().floor() as i32);
    (max / step).round() * step + step
}

/// Whole numbers once the axis is long enough, two decimals below that
fn tick_label(value: f64, limit: f64) -> String {
    match limit >= f64::from(GRID_LINES) {
        true => format!("{:.0}", value),
        false => format!("{:.2}", value),
    }
}

fn text_width(text: &str, scale: i64) -> i64 {
    text.chars().count() as i64 * GLYPH * scale
}

/// Draws `text` with its top left corner at `at`, `scale` pixels per font pixel
///
/// Characters the font lacks are drawn as `?`.
fn draw_text(image: &mut RgbImage, text: &str, at: (i64, i64), scale: i64, color: Rgb<u8>) {
    for (i, c) in text.chars().enumerate() {
        let glyph = BASIC_FONTS
            .get(c)
            .or_else(|| BASIC_FONTS.get('?'))
            .unwrap_or_default();
        let left = at.0 + i as i64 * GLYPH * scale;
        for (row, bits) in glyph.iter().enumerate() {
            for column in 0..GLYPH {
                if bits & (1 << column) != 0 {
                    let y = at.1 + row as i64 * scale;
                    fill_rect(image, left + column * scale, y, scale, color);
                }
            }
        }
    }
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) {
        if x < image.width() && y < image.height() {
            image.put_pixel(x, y, color);
        }
    }
}

fn fill_rect(image: &mut RgbImage, x: i64, y: i64, size: i64, color: Rgb<u8>) {
    fill_area(image, x, y, size, size, color);
}

fn fill_area(image: &mut RgbImage, x: i64, y: i64, width: i64, height: i64, color: Rgb<u8>) {
    for dy in 0..height {
        for dx in 0..width {
            put(image, x + dx, y + dy, color);
        }
    }
}

/// Bresenham's line algorithm
fn draw_line(image: &mut RgbImage, (x0, y0): (i64, i64), (x1, y1): (i64, i64), color: Rgb<u8>) {
    let (dx, dy) = ((x1 - x0).abs(), -(y1 - y0).abs());
    let (sx, sy) = (if x0 < x1 { 1 } else { -1 }, if y0 < y1 { 1 } else { -1 });
    let (mut x, mut y, mut error) = (x0, y0, dx + dy);

    loop {
        put(image, x, y, color);
        if x == x1 && y == y1 {
            break;
        }
        let e2 = 2 * error;
        if e2 >= dy {
            error += dy;
            x += sx;
        }
        if e2 <= dx {
            error += dx;
            y += sy;
        }
    }
}
