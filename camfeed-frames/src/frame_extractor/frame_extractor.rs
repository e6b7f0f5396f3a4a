extern crate ffmpeg_next as ffmpeg;

use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use super::logger::{self, fault, warning, Item};

use color_eyre::eyre::{self, Context};
use ffmpeg::codec::Context as CodecContext;
use ffmpeg::decoder::Video as DecoderVideo;
use ffmpeg::format::context::Input as FormatContext;
use ffmpeg::format::{input, Pixel};
use ffmpeg::frame::Video as FrameVideo;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::context::Context as ScalingContext;
use ffmpeg::util::log as ffmpeglog;
use ffmpeg::{Packet as CodecPacket, Rational};
use ffmpeg_sys_next::{AV_NOPTS_VALUE, AV_TIME_BASE};
use image::RgbImage;

pub type Result<T> = eyre::Result<T>;

static FFMPEG_INITIALIZED: OnceLock<std::result::Result<(), ffmpeg::Error>> =
    OnceLock::new();

thread_local! {
    static LOGS: RefCell<Vec<Item>> = const {RefCell::new(Vec::new())};
}

/// Decodes every frame of a video, in order, as RGB images.
pub struct FrameExtractor<L: logger::Logger = logger::LogLogger> {
    logger: L,

    ictx: FormatContext,
    decoder: DecoderVideo,
    converter: ScalingContext,
    video_stream_index: usize,

    frame_rate: f64,
    duration: Option<Duration>,
}

impl FrameExtractor<logger::LogLogger> {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new_with_logger(path, logger::LogLogger)
    }
}

impl<L> FrameExtractor<L>
where
    L: logger::Logger,
{
    pub fn new_with_logger(path: impl AsRef<Path>, logger: L) -> Result<Self> {
        if let Err(e) = FFMPEG_INITIALIZED.get_or_init(|| {
            ffmpeg::init()?;
            ffmpeglog::set_level(ffmpeglog::Level::Warning);
            unsafe {
                ffmpeg_sys_next::av_log_set_callback(Some(ffmpeg_log_adaptor));
            }
            Ok(())
        }) {
            return Err(e.clone()).wrap_err("Failed to initialize ffmpeg");
        }

        let opened = Self::open(path.as_ref(), &logger);
        flush_ffmpeg_logs(&logger);
        let (mut ictx, video_stream_index, frame_rate) = opened?;

        let duration = match ictx.duration() {
            AV_NOPTS_VALUE => None,
            d if d < 0 => None,
            d => Some(Duration::from_micros(
                (d as u64).saturating_mul(1_000_000) / AV_TIME_BASE as u64,
            )),
        };

        let decoder = {
            let stream = ictx
                .stream(video_stream_index)
                .ok_or(eyre::eyre!("The video stream disappeared"))?;
            CodecContext::from_parameters(stream.parameters())
                .wrap_err("No codec found")?
                .decoder()
                .video()
                .wrap_err("No codec found, of type video (?)")?
        };

        let converter = pixel_converter(&decoder)?;

        ictx.streams_mut()
            .filter(|stream| stream.index() != video_stream_index)
            .for_each(|mut stream| stream_set_discard_all(&mut stream));

        let myself = Self {
            logger,
            ictx,
            decoder,
            converter,
            video_stream_index,
            frame_rate,
            duration,
        };
        myself.log_ffmpeg_logs();
        Ok(myself)
    }

    fn open(path: &Path, logger: &L) -> Result<(FormatContext, usize, f64)> {
        let ictx = input(&path).wrap_err("Failed to open the file")?;
        let (index, frame_rate) = {
            let video = ictx
                .streams()
                .best(Type::Video)
                .ok_or(eyre::eyre!("No video stream"))?;
            let frame_rate = [video.avg_frame_rate(), video.rate()]
                .into_iter()
                .map(rational_to_f64)
                .find(|fps| *fps > 0.0)
                .unwrap_or_else(|| {
                    warning!(logger, "The video stream does not have a frame rate");
                    0.0
                });
            (video.index(), frame_rate)
        };
        Ok((ictx, index, frame_rate))
    }

    fn log_ffmpeg_logs(&self) {
        flush_ffmpeg_logs(&self.logger)
    }

    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    /// Frames per second, zero if it is unknown.
    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    /// The length of the whole file, if the container knows it.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn next(&mut self) -> Result<Option<RgbImage>> {
        loop {
            let mut frame = FrameVideo::empty();
            // avcodec_receive_frame
            // https://ffmpeg.org/doxygen/trunk/group__lavc__decoding.html#ga11e6542c4e66d3028668788a1a74217c
            let received = self.decoder.receive_frame(&mut frame);
            self.log_ffmpeg_logs();
            match received {
                Ok(()) => {
                    let mut converted = FrameVideo::empty();
                    self.converter
                        .run(&frame, &mut converted)
                        .wrap_err("Failed to convert the decoded frame")?;
                    return create_rust_image(converted).map(Some);
                }
                Err(ffmpeg::Error::Other {
                    errno: libc::EAGAIN,
                }) => self.feed_decoder()?,
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => {
                    return Err(e).wrap_err("Decoder error when receiving a frame from it");
                }
            }
        }
    }

    /// Sends the next packet of the video stream to the decoder, or EOF if there are no
    /// more.
    fn feed_decoder(&mut self) -> Result<()> {
        loop {
            // http://ffmpeg.org/doxygen/trunk/group__lavf__decoding.html#ga4fdb3084415a82e3810de6ee60e46a61
            let mut packet = CodecPacket::empty();
            let read = packet.read(&mut self.ictx);
            self.log_ffmpeg_logs();
            match read {
                Ok(()) if packet.stream() == self.video_stream_index => {
                    let sent = self.decoder.send_packet(&packet);
                    self.log_ffmpeg_logs();
                    match sent {
                        Ok(()) => return Ok(()),
                        Err(e) => fault!(self.logger, "Failed to decode a packet: {}", e),
                    }
                }
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => {
                    return self
                        .decoder
                        .send_eof()
                        .wrap_err("Failed to send EOF to the decoder");
                }
                Err(e) => {
                    eyre::bail!("Failed to read a packet from the stream: {e}");
                }
            }
        }
    }
}

impl<L: logger::Logger> Drop for FrameExtractor<L> {
    fn drop(&mut self) {
        self.log_ffmpeg_logs();
    }
}

impl<L: logger::Logger> fmt::Debug for FrameExtractor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameExtractor")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("fps", &self.frame_rate)
            .field("duration", &self.duration)
            .field("stream", &self.video_stream_index)
            .finish()
    }
}

fn flush_ffmpeg_logs(logger: &impl logger::Logger) {
    LOGS.with_borrow_mut(|vec| {
        for item in vec.drain(..) {
            logger.log_item(item);
        }
    })
}

fn rational_to_f64(r: Rational) -> f64 {
    if r.denominator() == 0 {
        return 0.0;
    }
    let fps = f64::from(r.numerator()) / f64::from(r.denominator());
    if fps.is_finite() {
        fps
    } else {
        0.0
    }
}

fn pixel_converter(decoder: &DecoderVideo) -> Result<ScalingContext> {
    eyre::ensure!(decoder.format() != Pixel::None, "No pixel format");
    ScalingContext::get(
        decoder.format(),
        decoder.width(),
        decoder.height(),
        // http://git.videolan.org/?p=ffmpeg.git;a=blob;f=libavutil/pixfmt.h;hb=HEAD
        Pixel::RGB24,
        decoder.width(),
        decoder.height(),
        ffmpeg::software::scaling::Flags::FAST_BILINEAR,
    )
    .wrap_err("Failed to create the pixel converter")
}

/// Copies the frame into an image, dropping the padding ffmpeg might have at the end
/// of each line.
fn create_rust_image(converted: FrameVideo) -> Result<RgbImage> {
    eyre::ensure!(
        converted.format() == Pixel::RGB24 && converted.planes() == 1,
        "The converted frame is not packed RGB24"
    );

    let (width, height) = (converted.width(), converted.height());
    let src_linesize = converted.stride(0);
    let trg_linesize = 3 * width as usize;
    let data = converted.data(0);
    eyre::ensure!(src_linesize >= trg_linesize, "The frame lines are too short");

    let data = if src_linesize == trg_linesize {
        data.to_vec()
    } else {
        data.chunks(src_linesize)
            .take(height as usize)
            .flat_map(|line| &line[..trg_linesize])
            .copied()
            .collect()
    };

    RgbImage::from_vec(width, height, data)
        .ok_or_else(|| eyre::eyre!("The frame buffer is too small for {width}x{height}"))
}

fn stream_set_discard_all(stream: &mut ffmpeg::StreamMut<'_>) {
    unsafe {
        let ptr = stream.as_mut_ptr();
        if !ptr.is_null() {
            (*ptr).discard = ffmpeg_sys_next::AVDiscard::AVDISCARD_ALL;
        }
    }
}

extern "C" {
    pub fn vsnprintf(
        strbuf: *mut libc::c_char,
        size: libc::size_t,
        format: *const libc::c_char,
        va_list: *mut libc::c_void,
    ) -> libc::c_int;
}

/// Formats ffmpeg's log messages and buffers them in [`LOGS`], they are emitted the next
/// time the extractor on this thread gets control back.
unsafe extern "C" fn ffmpeg_log_adaptor(
    avcl: *mut libc::c_void,
    level: libc::c_int,
    fmt: *const libc::c_char,
    va_list: *mut ffmpeg_sys_next::__va_list_tag,
) {
    if level > ffmpeg_sys_next::av_log_get_level() {
        return;
    }

    const BUF_SIZE: usize = 2048;
    let mut buffer: Vec<u8> = vec![0; BUF_SIZE];
    let written = vsnprintf(
        buffer.as_mut_ptr() as *mut libc::c_char,
        BUF_SIZE,
        fmt,
        va_list as *mut libc::c_void,
    );
    let Ok(written) = usize::try_from(written) else {
        eprintln!("failed to format a log message from ffmpeg");
        return;
    };
    // vsnprintf returns what it wanted to write, not what fit
    buffer.truncate(written.min(BUF_SIZE - 1));

    let body = String::from_utf8_lossy(&buffer).trim_end().to_owned();
    let target = format!("ffmpeg::{}", class_name(avcl));
    let level = match ffmpeglog::Level::try_from(level) {
        Ok(ffmpeglog::Level::Error | ffmpeglog::Level::Fatal | ffmpeglog::Level::Panic) => {
            logger::Level::Error
        }
        Ok(ffmpeglog::Level::Warning) => logger::Level::Warn,
        Ok(ffmpeglog::Level::Info) | Err(_) => logger::Level::Info,
        Ok(_) => logger::Level::Verbose,
    };

    LOGS.with_borrow_mut(|vec| {
        vec.push(Item {
            level,
            target,
            body,
        })
    });
}

unsafe fn class_name(avcl: *mut libc::c_void) -> String {
    if avcl.is_null() {
        return "NULL_avcl".into();
    }
    let avc = *(avcl as *const *const ffmpeg_sys_next::AVClass);
    if avc.is_null() {
        return "NULL_avc".into();
    }
    let Some(item_name) = (*avc).item_name else {
        return "NULL_item".into();
    };

    let item = std::ffi::CStr::from_ptr(item_name(avcl)).to_string_lossy();
    if item == "NULL" {
        std::ffi::CStr::from_ptr((*avc).class_name)
            .to_string_lossy()
            .into_owned()
    } else {
        item.into_owned()
    }
}
