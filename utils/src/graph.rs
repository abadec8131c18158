use std::{
    fmt::Display,
    fs::{self, File},
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use plotters::prelude::*;
use structopt::StructOpt;

#[derive(StructOpt)]
pub struct GraphOptions {
    /// Loss logs written by `train --log-dir`.
    #[structopt(required = true, parse(from_os_str))]
    pub logs: Vec<PathBuf>,
    #[structopt(short, long, default_value = "plots", parse(from_os_str))]
    pub output: PathBuf,
    /// Moving average window for the smoothed curves.
    #[structopt(short, long, default_value = "1")]
    pub window: usize,
}

const COLOURS: &[RGBColor] = &[
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

const CHART_BG_COLOUR: RGBAColor = RGBAColor(234, 234, 242, 1.0);

const LEGEND_STROKE_WIDTH: u32 = 4;
const RAW_LINE_STROKE_WIDTH: u32 = 1;
const SMOOTH_LINE_STROKE_WIDTH: u32 = 2;

const X_LABEL_AREA_SIZE: i32 = 60;
const Y_LABEL_AREA_SIZE: i32 = 90;
const LEGEND_AREA_SIZE: i32 = 50;
const LEGEND_DRAW_OFFSET: i32 = 40;

const TITLE_FONT_SIZE: i32 = 40;
const LABEL_FONT_SIZE: i32 = 25;
const LEGEND_FONT_SIZE: i32 = 25;
const TICKS_FONT_SIZE: i32 = 20;

const FONT: &str = "sans-serif";

const MARGIN: i32 = 20;

const IMG_DIMS: (u32, u32) = (1920, 1080);

const NOISY_PLOT_OPACITY: f64 = 0.3;

fn plot_error<E: Display>(err: E) -> anyhow::Error {
    anyhow::anyhow!("Failed to draw plot: {err}")
}

/// Calculates the simple moving average
fn moving_average(data: &[f64], window_size: usize) -> Vec<f64> {
    data.windows(window_size).map(|window| window.iter().sum::<f64>() / window_size as f64).collect()
}

/// Reads the last whitespace separated token of every non-empty line.
fn read_losses(path: &Path) -> anyhow::Result<Vec<f64>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut losses = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let Some(token) = line.split_whitespace().next_back() else {
            continue;
        };

        losses.push(token.parse().with_context(|| format!("Invalid loss {token} in {}", path.display()))?);
    }

    Ok(losses)
}

impl GraphOptions {
    pub fn run(&self) -> anyhow::Result<()> {
        if self.window == 0 {
            bail!("Window size must be positive.");
        }

        fs::create_dir_all(&self.output).with_context(|| format!("Failed to create {}", self.output.display()))?;

        let mut sequences = Vec::new();
        for path in &self.logs {
            let name = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            let losses = read_losses(path)?;

            if losses.is_empty() {
                bail!("No losses found in {}", path.display());
            }

            sequences.push((name, losses));
        }

        let x_max = sequences.iter().map(|(_, data)| data.len()).max().unwrap_or(1) as i32;
        let mut y_min = f64::MAX;
        let mut y_max = f64::MIN;
        for (_, data) in &sequences {
            y_min = data.iter().copied().fold(y_min, f64::min);
            y_max = data.iter().copied().fold(y_max, f64::max);
        }

        if y_max - y_min < f64::EPSILON {
            y_max += 1.0;
            y_min -= 1.0;
        }

        let output_path = self.output.join("training_mse.png");
        let root = BitMapBackend::new(&output_path, IMG_DIMS).into_drawing_area();
        root.fill(&WHITE).map_err(plot_error)?;

        let mut chart = ChartBuilder::on(&root)
            .caption("Training error per epoch", (FONT, TITLE_FONT_SIZE))
            .margin(MARGIN)
            .x_label_area_size(X_LABEL_AREA_SIZE)
            .y_label_area_size(Y_LABEL_AREA_SIZE)
            .build_cartesian_2d(0..x_max, y_min..y_max)
            .map_err(plot_error)?;

        chart.plotting_area().fill(&CHART_BG_COLOUR).map_err(plot_error)?;

        chart
            .configure_mesh()
            .x_label_style((FONT, TICKS_FONT_SIZE).into_font())
            .y_label_style((FONT, TICKS_FONT_SIZE).into_font())
            .axis_desc_style((FONT, LABEL_FONT_SIZE).into_font())
            .x_desc("Epoch")
            .y_desc("MSE")
            .draw()
            .map_err(plot_error)?;

        for (i, (name, data)) in sequences.iter().enumerate() {
            let colour = COLOURS[i % COLOURS.len()];
            let raw_style = if self.window > 1 { colour.mix(NOISY_PLOT_OPACITY) } else { colour.mix(1.0) };

            chart
                .draw_series(LineSeries::new(
                    data.iter().enumerate().map(|(x, &y)| (x as i32 + 1, y)),
                    ShapeStyle::from(raw_style).stroke_width(RAW_LINE_STROKE_WIDTH),
                ))
                .map_err(plot_error)?
                .label(name.as_str())
                .legend(move |(x, y)| {
                    PathElement::new(
                        [(x, y), (x + LEGEND_DRAW_OFFSET, y)],
                        ShapeStyle::from(colour).stroke_width(LEGEND_STROKE_WIDTH),
                    )
                });

            if self.window > 1 && data.len() >= self.window {
                let smoothed = moving_average(data, self.window);
                chart
                    .draw_series(LineSeries::new(
                        smoothed.iter().enumerate().map(|(x, &y)| ((x + self.window) as i32, y)),
                        ShapeStyle::from(colour).stroke_width(SMOOTH_LINE_STROKE_WIDTH),
                    ))
                    .map_err(plot_error)?;
            }
        }

        chart
            .configure_series_labels()
            .border_style(BLACK)
            .background_style(WHITE.mix(0.8))
            .position(SeriesLabelPosition::UpperRight)
            .legend_area_size(LEGEND_AREA_SIZE)
            .label_font((FONT, LEGEND_FONT_SIZE).into_font())
            .draw()
            .map_err(plot_error)?;
        root.present().map_err(plot_error)?;

        println!("Plot saved to {}", output_path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing() {
        assert_eq!(moving_average(&[1.0, 3.0, 5.0, 7.0], 2), vec![2.0, 4.0, 6.0]);
        assert_eq!(moving_average(&[1.0, 2.0], 1), vec![1.0, 2.0]);
    }
}
