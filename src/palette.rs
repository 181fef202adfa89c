//! Global palette generation and palette mapping.
//!
//! GIF frames index into a palette of at most 256 colours. A palette built
//! per frame makes colours flicker between frames, so the encoder builds one
//! palette for the whole frame stream with FFmpeg's `palettegen` filter and
//! maps every frame onto it with `paletteuse`:
//!
//! ```text
//! pass 1:  buffer(in) → palettegen → buffersink(out)
//! pass 2:  buffer(in) ─┐
//!                      ├→ paletteuse → buffersink(out)
//!          buffer(pal) ┘
//! ```
//!
//! Both graphs take packed RGB24 frames timed at `1/frame_rate`. Pass 2
//! yields PAL8 frames whose indices refer to the pass 1 palette.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use ffmpeg_next::{
    Error as FfmpegError,
    ffi::AVPixelFormat,
    filter::{self, Graph as FilterGraph},
    format::Pixel,
    frame::Video as VideoFrame,
};

use crate::error::ConversionError;
use crate::utilities::{Pull, pull_outcome};

/// Maximum number of colours a GIF palette can hold.
pub const MAX_PALETTE_COLORS: usize = 256;

/// Smallest palette `palettegen` will build.
pub const MIN_PALETTE_COLORS: usize = 4;

/// `palettegen` always emits a 16x16 frame, one pixel per palette entry.
const PALETTE_SIDE: u32 = 16;

/// Error diffusion applied when mapping frames onto the palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dither {
    /// Sierra-2-4A ("Sierra Lite"): 2/4 of the error to the right, 1/4
    /// below-left, 1/4 below.
    #[default]
    SierraLite,
    /// Floyd-Steinberg error diffusion.
    FloydSteinberg,
    /// Ordered 8x8 Bayer dithering.
    Bayer,
    /// Plain nearest-colour mapping.
    None,
}

impl Dither {
    /// Value of `paletteuse`'s `dither` option.
    fn filter_value(self) -> &'static str {
        match self {
            Dither::SierraLite => "sierra2_4a",
            Dither::FloydSteinberg => "floyd_steinberg",
            Dither::Bayer => "bayer",
            // DITHERING_NONE; older FFmpeg builds lack the named constant.
            Dither::None => "0",
        }
    }
}

/// The palette `palettegen` produced: its 16x16 frame and the same colours
/// as a flat RGB table, in index order.
pub(crate) struct Palette {
    frame: VideoFrame,
    table: Vec<u8>,
}

impl Palette {
    fn from_frame(frame: VideoFrame) -> Self {
        let stride = frame.stride(0);
        let data = frame.data(0);
        let mut table = Vec::with_capacity(MAX_PALETTE_COLORS * 3);
        for row in 0..PALETTE_SIDE as usize {
            for column in 0..PALETTE_SIDE as usize {
                let offset = row * stride + column * 4;
                // RGB32 is native-endian 0xAARRGGBB.
                let value = u32::from_ne_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]);
                table.extend_from_slice(&[(value >> 16) as u8, (value >> 8) as u8, value as u8]);
            }
        }
        Self { frame, table }
    }

    /// Flat RGB table for the GIF's global colour table. Always 256 entries;
    /// those past the generated colour count are filler.
    pub(crate) fn gif_table(&self) -> &[u8] {
        &self.table
    }
}

fn filter_error(context: &'static str) -> impl Fn(FfmpegError) -> ConversionError {
    move |e| ConversionError::Encode(format!("{context}: {e}"))
}

fn pixel_format_id(format: Pixel) -> i32 {
    AVPixelFormat::from(format) as i32
}

fn buffer_args(width: u32, height: u32, format: Pixel, frame_rate: u32) -> String {
    format!(
        "video_size={width}x{height}:pix_fmt={}:time_base=1/{frame_rate}:pixel_aspect=1/1",
        pixel_format_id(format),
    )
}

fn add_filter(
    graph: &mut FilterGraph,
    name: &str,
    label: &str,
    args: &str,
) -> Result<(), ConversionError> {
    let filter = filter::find(name).ok_or_else(|| {
        ConversionError::Encode(format!("FFmpeg '{name}' filter not found"))
    })?;
    graph.add(&filter, label, args).map_err(|e| {
        ConversionError::Encode(format!("Failed to add {name} filter: {e}"))
    })?;
    Ok(())
}

fn add_source(graph: &mut FilterGraph, label: &str, frame: &VideoFrame) -> Result<(), ConversionError> {
    graph
        .get(label)
        .ok_or_else(|| ConversionError::Encode(format!("Filter '{label}' not found")))?
        .source()
        .add(frame)
        .map_err(filter_error("Failed to feed filter graph"))
}

fn flush_source(graph: &mut FilterGraph, label: &str) -> Result<(), ConversionError> {
    graph
        .get(label)
        .ok_or_else(|| ConversionError::Encode(format!("Filter '{label}' not found")))?
        .source()
        .flush()
        .map_err(filter_error("Failed to flush filter graph"))
}

/// Pull one frame from the `out` sink. Also runs the graph, so queued input
/// is consumed even when nothing comes out.
fn pull_sink(graph: &mut FilterGraph, frame: &mut VideoFrame) -> Result<Pull, ConversionError> {
    let result = graph
        .get("out")
        .ok_or_else(|| ConversionError::Encode("Filter 'out' not found".to_string()))?
        .sink()
        .frame(frame);
    pull_outcome(result).map_err(filter_error("Filter graph failed"))
}

/// Pass 1: accumulates colour statistics over every frame.
pub(crate) struct PaletteGenerator {
    graph: FilterGraph,
    scratch: VideoFrame,
}

impl Debug for PaletteGenerator {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PaletteGenerator").finish_non_exhaustive()
    }
}

impl PaletteGenerator {
    pub(crate) fn new(
        width: u32,
        height: u32,
        frame_rate: u32,
        max_colors: u16,
    ) -> Result<Self, ConversionError> {
        ffmpeg_next::init().map_err(filter_error("FFmpeg initialisation failed"))?;

        let mut graph = FilterGraph::new();
        add_filter(
            &mut graph,
            "buffer",
            "in",
            &buffer_args(width, height, Pixel::RGB24, frame_rate),
        )?;
        add_filter(&mut graph, "buffersink", "out", "")?;

        let spec = format!("palettegen=max_colors={max_colors}:reserve_transparent=0");
        graph
            .output("in", 0)
            .map_err(filter_error("Filter graph output error"))?
            .input("out", 0)
            .map_err(filter_error("Filter graph input error"))?
            .parse(&spec)
            .map_err(filter_error("Filter graph parse error"))?;
        graph
            .validate()
            .map_err(filter_error("Filter graph validation"))?;

        Ok(Self {
            graph,
            scratch: VideoFrame::empty(),
        })
    }

    /// Add a frame's colours to the statistics.
    pub(crate) fn push(&mut self, frame: &VideoFrame) -> Result<(), ConversionError> {
        add_source(&mut self.graph, "in", frame)?;
        // Nothing comes out before end of stream.
        pull_sink(&mut self.graph, &mut self.scratch)?;
        Ok(())
    }

    /// End the stream and collect the palette.
    pub(crate) fn finish(&mut self) -> Result<Palette, ConversionError> {
        flush_source(&mut self.graph, "in")?;
        let mut frame = VideoFrame::empty();
        match pull_sink(&mut self.graph, &mut frame)? {
            Pull::Ready => Ok(Palette::from_frame(frame)),
            Pull::Pending | Pull::Finished => Err(ConversionError::Encode(
                "palettegen produced no palette".to_string(),
            )),
        }
    }
}

/// Pass 2: maps frames onto a fixed palette.
pub(crate) struct PaletteMapper {
    graph: FilterGraph,
    indexed: VideoFrame,
    width: usize,
    height: usize,
}

impl Debug for PaletteMapper {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PaletteMapper")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

impl PaletteMapper {
    /// Build the mapping graph and hand it `palette`, which the graph keeps
    /// for the rest of the stream.
    pub(crate) fn new(
        width: u32,
        height: u32,
        frame_rate: u32,
        mut palette: Palette,
        dither: Dither,
    ) -> Result<Self, ConversionError> {
        let mut graph = FilterGraph::new();
        add_filter(
            &mut graph,
            "buffer",
            "in",
            &buffer_args(width, height, Pixel::RGB24, frame_rate),
        )?;
        add_filter(
            &mut graph,
            "buffer",
            "pal",
            &buffer_args(PALETTE_SIDE, PALETTE_SIDE, palette.frame.format(), frame_rate),
        )?;
        add_filter(&mut graph, "buffersink", "out", "")?;

        let spec = format!(
            "[in][pal]paletteuse=dither={}[out]",
            dither.filter_value()
        );
        graph
            .output("in", 0)
            .map_err(filter_error("Filter graph output error"))?
            .output("pal", 0)
            .map_err(filter_error("Filter graph output error"))?
            .input("out", 0)
            .map_err(filter_error("Filter graph input error"))?
            .parse(&spec)
            .map_err(filter_error("Filter graph parse error"))?;
        graph
            .validate()
            .map_err(filter_error("Filter graph validation"))?;

        // A single palette frame at t=0, repeated for every input frame.
        palette.frame.set_pts(Some(0));
        add_source(&mut graph, "pal", &palette.frame)?;
        flush_source(&mut graph, "pal")?;

        Ok(Self {
            graph,
            indexed: VideoFrame::empty(),
            width: width as usize,
            height: height as usize,
        })
    }

    /// Queue the next frame in temporal order.
    pub(crate) fn push(&mut self, frame: &VideoFrame) -> Result<(), ConversionError> {
        add_source(&mut self.graph, "in", frame)
    }

    /// Signal that no more frames follow.
    pub(crate) fn flush(&mut self) -> Result<(), ConversionError> {
        flush_source(&mut self.graph, "in")
    }

    /// The next mapped frame as tightly packed palette indices, if one is
    /// ready.
    pub(crate) fn pull(&mut self) -> Result<Option<Vec<u8>>, ConversionError> {
        match pull_sink(&mut self.graph, &mut self.indexed)? {
            Pull::Ready => {}
            Pull::Pending | Pull::Finished => return Ok(None),
        }

        let stride = self.indexed.stride(0);
        let data = self.indexed.data(0);
        let mut indices = Vec::with_capacity(self.width * self.height);
        for row in 0..self.height {
            let start = row * stride;
            indices.extend_from_slice(&data[start..start + self.width]);
        }
        Ok(Some(indices))
    }
}
