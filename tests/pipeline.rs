//! End-to-end pipeline runs against shell-script stand-ins for the external
//! tools. Each fixture gets its own tool directory, so tool behaviour is
//! baked into the scripts rather than passed through the environment.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use open_make_tiff_lib::core::{ChannelEventSink, ConversionRequest, ConvertEvent};
use open_make_tiff_lib::processing::{
    Dispatcher, IccCatalog, IccProfile, Pipeline, PublishLocks, RawConverter, Toolchain, SUBFOLDER,
};
use open_make_tiff_lib::{ConvertError, ToolError};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const RAW_BYTES: &[u8] = b"RAWDATA";

const DECODER: &str = r#"for last; do :; done
cat "$last""#;

const NORMALIZER: &str = r#"src=$(printf '%s' "$2" | sed 's/%0$//')
cp "$src" "$3""#;

const PRECONVERTER: &str = r#"cp "$9" "$6/$8""#;

struct Fixture {
    _root: TempDir,
    tools: PathBuf,
    photos: PathBuf,
}

impl Fixture {
    /// Decoder, normaliser and metadata tool; no pre-converter.
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        let tools = root.path().join("tools");
        let photos = root.path().join("photos");
        std::fs::create_dir_all(&tools).unwrap();
        std::fs::create_dir_all(&photos).unwrap();

        let fixture = Self {
            _root: root,
            tools,
            photos,
        };
        fixture.tool("dcraw_emu", DECODER);
        fixture.tool("tiffcp", NORMALIZER);
        fixture.tool("exiftool", &fixture.metadata_body());
        fixture
    }

    /// Metadata tool: captures ICC bytes from stdin, succeeds if the target exists.
    fn metadata_body(&self) -> String {
        format!(
            r#"for a; do if [ "$a" = "-ICC_Profile<=-" ]; then cat > "{}"; fi; done
for last; do :; done
[ -f "$last" ]"#,
            self.tools.join("icc.bin").display()
        )
    }

    /// Metadata tool that fails whenever `flag` is among its arguments.
    fn metadata_failing_on(&self, flag: &str) {
        let guard = format!(
            "for a; do if [ \"$a\" = \"{flag}\" ]; then echo 'exiftool refused {flag}' >&2; exit 1; fi; done"
        );
        self.tool("exiftool", &format!("{guard}\n{}", self.metadata_body()));
    }

    /// Writes an executable script that records its arguments, then runs `body`.
    fn tool(&self, name: &str, body: &str) {
        let path = self.tools.join(name);
        let log = self.tools.join(format!("{name}.args"));
        let script = format!("#!/bin/sh\necho \"$@\" >> \"{}\"\n{}\n", log.display(), body);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn args(&self, name: &str) -> Vec<String> {
        std::fs::read_to_string(self.tools.join(format!("{name}.args")))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn raw(&self, name: &str) -> PathBuf {
        let path = self.photos.join(name);
        std::fs::write(&path, RAW_BYTES).unwrap();
        path
    }

    fn pipeline(&self, request: ConversionRequest, catalog: IccCatalog) -> Pipeline {
        Pipeline::new(
            Arc::new(Toolchain::from_dir(&self.tools)),
            Arc::new(catalog),
            Arc::new(request),
            Arc::new(PublishLocks::default()),
        )
    }
}

fn request() -> ConversionRequest {
    ConversionRequest {
        use_raw_preconverter: false,
        use_subfolder: false,
        icc_profile: None,
        worker_count: 2,
    }
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// After a failed run the directory holds the source and its run log only.
fn assert_only_source_and_log(dir: &Path, source: &str, stem: &str) -> String {
    let names = listing(dir);
    assert_eq!(names.len(), 2, "{names:?}");
    assert!(names.contains(&source.to_string()), "{names:?}");
    only_log(dir, stem)
}

/// The single `.log` left next to a failed source.
fn only_log(dir: &Path, stem: &str) -> String {
    let logs: Vec<_> = listing(dir)
        .into_iter()
        .filter(|n| n.starts_with(stem) && n.ends_with(".log"))
        .collect();
    assert_eq!(logs.len(), 1, "expected one log in {:?}", listing(dir));
    std::fs::read_to_string(dir.join(&logs[0])).unwrap()
}

#[tokio::test]
async fn converts_and_leaves_only_source_and_output() {
    let fx = Fixture::new();
    let src = fx.raw("IMG_0001.NEF");

    let out = fx
        .pipeline(request(), IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap();

    assert_eq!(out, fx.photos.join("IMG_0001.tiff"));
    assert_eq!(std::fs::read(&out).unwrap(), RAW_BYTES);
    assert_eq!(listing(&fx.photos), ["IMG_0001.NEF", "IMG_0001.tiff"]);
    assert_eq!(std::fs::read(&src).unwrap(), RAW_BYTES);

    let decoder = fx.args("dcraw_emu");
    assert_eq!(decoder.len(), 1);
    assert!(decoder[0].starts_with("-T -r 1 1 1 1 -o 0 -4 -Z - "));
    assert!(decoder[0].ends_with(".init"));

    // staging strip, then metadata transfer
    let exif = fx.args("exiftool");
    assert_eq!(exif.len(), 2);
    assert!(exif[0].contains("-ALL="));
    assert!(exif[1].contains("-tagsfromfile"));
    assert!(exif[1].contains("-ALL:ALL"));
    assert!(exif[1].contains("-ICC_Profile="));
    assert!(exif[1].contains(src.to_str().unwrap()));
}

#[tokio::test]
async fn existing_outputs_are_never_overwritten() {
    let fx = Fixture::new();
    let src = fx.raw("shot.cr2");
    std::fs::write(fx.photos.join("shot.tiff"), b"first").unwrap();
    std::fs::write(fx.photos.join("shot_1.tiff"), b"second").unwrap();

    let out = fx
        .pipeline(request(), IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap();

    assert_eq!(out, fx.photos.join("shot_2.tiff"));
    assert_eq!(std::fs::read(fx.photos.join("shot.tiff")).unwrap(), b"first");
    assert_eq!(std::fs::read(fx.photos.join("shot_1.tiff")).unwrap(), b"second");
}

#[tokio::test]
async fn selected_icc_profile_is_piped_to_the_metadata_tool() {
    let fx = Fixture::new();
    let src = fx.raw("a.arw");
    let catalog = IccCatalog::from_profiles([IccProfile::new("sRGB", b"ICCDATA".to_vec())]);
    let req = ConversionRequest {
        icc_profile: Some("sRGB".into()),
        ..request()
    };

    fx.pipeline(req, catalog)
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap();

    let exif = fx.args("exiftool");
    assert!(exif[1].contains("-ICC_Profile<=-"));
    assert!(!exif[1].contains("-ICC_Profile= "));
    assert_eq!(std::fs::read(fx.tools.join("icc.bin")).unwrap(), b"ICCDATA");
}

#[tokio::test]
async fn decoder_diagnostics_fail_the_run() {
    let fx = Fixture::new();
    fx.tool("dcraw_emu", &format!("echo 'corrupt data' >&2\n{DECODER}"));
    let src = fx.raw("bad.raf");

    let err = fx
        .pipeline(request(), IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::Tool(ToolError::Diagnostics { .. })), "{err:?}");
    let names = listing(&fx.photos);
    assert_eq!(names.len(), 2, "{names:?}");
    assert!(names.contains(&"bad.raf".to_string()));
    let log = only_log(&fx.photos, "bad_");
    assert!(log.contains("corrupt data"));
    assert!(log.contains("src filepath"));
    assert!(fx.args("tiffcp").is_empty());
}

#[tokio::test]
async fn decoder_blank_stderr_still_fails_the_run() {
    let fx = Fixture::new();
    fx.tool("dcraw_emu", &format!("printf '\\n' >&2\n{DECODER}"));
    let src = fx.raw("ws.nef");

    let err = fx
        .pipeline(request(), IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::Tool(ToolError::Diagnostics { .. })), "{err:?}");
    assert_only_source_and_log(&fx.photos, "ws.nef", "ws_");
    assert!(!fx.photos.join("ws.tiff").exists());
}

#[tokio::test]
async fn staging_strip_failure_removes_intermediates() {
    let fx = Fixture::new();
    fx.metadata_failing_on("-ALL=");
    let src = fx.raw("st.nef");

    let err = fx
        .pipeline(request(), IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::Tool(ToolError::Status { .. })), "{err:?}");
    let log = assert_only_source_and_log(&fx.photos, "st.nef", "st_");
    assert!(log.contains("exiftool refused -ALL="));
    assert!(fx.args("dcraw_emu").is_empty());
    assert_eq!(std::fs::read(&src).unwrap(), RAW_BYTES);
}

#[tokio::test]
async fn metadata_transfer_failure_removes_intermediates() {
    let fx = Fixture::new();
    fx.metadata_failing_on("-ALL:ALL");
    let src = fx.raw("m.nef");
    let catalog = IccCatalog::from_profiles([IccProfile::new("sRGB", b"ICCDATA".to_vec())]);
    let req = ConversionRequest {
        icc_profile: Some("sRGB".into()),
        ..request()
    };

    let err = fx
        .pipeline(req, catalog)
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::Tool(ToolError::Status { .. })), "{err:?}");
    assert_only_source_and_log(&fx.photos, "m.nef", "m_");
    assert_eq!(fx.args("tiffcp").len(), 1);
    let exif = fx.args("exiftool");
    assert!(exif.last().unwrap().contains("-ICC_Profile<=-"));
}

#[tokio::test]
async fn publish_failure_removes_intermediates() {
    let fx = Fixture::new();
    // metadata succeeds but the working TIFF is gone by the time of the rename
    fx.tool(
        "exiftool",
        &format!(
            "{}\nstatus=$?\nfor a; do case \"$a\" in -ALL:ALL) rm -f \"$last\";; esac; done\nexit $status",
            fx.metadata_body()
        ),
    );
    let src = fx.raw("pub.nef");

    let err = fx
        .pipeline(request(), IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::Publish(_)), "{err:?}");
    assert_only_source_and_log(&fx.photos, "pub.nef", "pub_");
    assert!(!fx.photos.join("pub.tiff").exists());
}

#[tokio::test]
async fn cancellation_kills_the_running_tool_and_cleans_up() {
    let fx = Fixture::new();
    let marker = fx.tools.join("decoder-finished");
    fx.tool(
        "dcraw_emu",
        &format!("sleep 1\ntouch \"{}\"\n{DECODER}", marker.display()),
    );
    let src = fx.raw("k.nef");

    // cancel as soon as the decoder has recorded its arguments
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let decoder_args = fx.tools.join("dcraw_emu.args");
    tokio::spawn(async move {
        while !decoder_args.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        trigger.cancel();
    });

    let err = fx
        .pipeline(request(), IccCatalog::default())
        .run(&cancel, &src)
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::Tool(ToolError::Cancelled(_))), "{err:?}");
    assert_eq!(fx.args("dcraw_emu").len(), 1);
    assert_only_source_and_log(&fx.photos, "k.nef", "k_");

    // the killed script never reaches the line after its sleep
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!marker.exists());
    assert_eq!(listing(&fx.photos).len(), 2);
}

#[tokio::test]
async fn normaliser_failure_removes_intermediates() {
    let fx = Fixture::new();
    fx.tool("tiffcp", "echo 'not a TIFF' >&2\nexit 1");
    let src = fx.raw("x.orf");

    let err = fx
        .pipeline(request(), IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap_err();

    assert!(matches!(err, ConvertError::Tool(ToolError::Status { .. })), "{err:?}");
    assert_eq!(listing(&fx.photos).len(), 2);
    assert!(only_log(&fx.photos, "x_").contains("not a TIFF"));
}

#[tokio::test]
async fn preconverter_output_feeds_the_decoder() {
    let fx = Fixture::new();
    fx.tool("dng_converter", PRECONVERTER);
    let src = fx.raw("p.cr3");
    let req = ConversionRequest {
        use_raw_preconverter: true,
        ..request()
    };

    let out = fx
        .pipeline(req, IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap();

    let dng = fx.args("dng_converter");
    assert_eq!(dng.len(), 1);
    assert!(dng[0].starts_with("-c -u -l -p0 -d "));
    assert!(dng[0].ends_with(src.to_str().unwrap()));
    assert!(out.exists());
    assert_eq!(listing(&fx.photos), ["p.cr3", "p.tiff"]);
}

#[tokio::test]
async fn preconverter_failure_falls_back_to_the_source() {
    let fx = Fixture::new();
    fx.tool("dng_converter", "echo 'unsupported camera' >&2\nexit 2");
    let src = fx.raw("q.cr3");
    let req = ConversionRequest {
        use_raw_preconverter: true,
        ..request()
    };

    let out = fx
        .pipeline(req, IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap();

    assert_eq!(fx.args("dng_converter").len(), 1);
    assert_eq!(std::fs::read(&out).unwrap(), RAW_BYTES);
    assert_eq!(listing(&fx.photos), ["q.cr3", "q.tiff"]);
}

#[tokio::test]
async fn fff_sources_skip_decoding() {
    let fx = Fixture::new();
    let src = fx.raw("scan.FFF");

    let out = fx
        .pipeline(request(), IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap();

    assert_eq!(out, fx.photos.join("scan.tiff"));
    assert!(fx.args("dcraw_emu").is_empty());
    let tiffcp = fx.args("tiffcp");
    assert_eq!(tiffcp.len(), 1);
    assert!(tiffcp[0].contains(&format!("{}%0", src.display())));
    // only the metadata transfer, no staging strip
    assert_eq!(fx.args("exiftool").len(), 1);
}

#[tokio::test]
async fn subfolder_receives_the_output() {
    let fx = Fixture::new();
    let src = fx.raw("s.pef");
    let req = ConversionRequest {
        use_subfolder: true,
        ..request()
    };

    let out = fx
        .pipeline(req, IccCatalog::default())
        .run(&CancellationToken::new(), &src)
        .await
        .unwrap();

    let sub = fx.photos.join(SUBFOLDER);
    assert_eq!(out, sub.join("s.tiff"));
    assert_eq!(listing(&sub), ["s.tiff"]);
    assert_eq!(listing(&fx.photos), ["make_tiff", "s.pef"]);
}

#[tokio::test]
async fn cancelled_run_keeps_only_the_log() {
    let fx = Fixture::new();
    let src = fx.raw("c.nef");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = fx
        .pipeline(request(), IccCatalog::default())
        .run(&cancel, &src)
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "{err:?}");
    assert_eq!(listing(&fx.photos).len(), 2);
    assert!(fx.args("dcraw_emu").is_empty());
}

#[tokio::test]
async fn dispatcher_converts_only_regular_files() {
    let fx = Fixture::new();
    let good = fx.raw("good.nef");
    let missing = fx.photos.join("missing.nef");
    let folder = fx.photos.join("folder");
    std::fs::create_dir(&folder).unwrap();

    let (sink, mut rx) = ChannelEventSink::new();
    let converter = RawConverter::new(
        Arc::new(Toolchain::from_dir(&fx.tools)),
        Arc::new(IccCatalog::default()),
    );
    let dispatcher = Dispatcher::new(Arc::new(converter), Arc::new(sink), CancellationToken::new());

    dispatcher
        .convert(vec![good.clone(), missing, folder], request())
        .unwrap()
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            ConvertEvent::BatchStarted,
            ConvertEvent::FileStarted { path: good.clone() },
            ConvertEvent::FileCompleted {
                path: good,
                output: fx.photos.join("good.tiff"),
            },
            ConvertEvent::BatchFinished,
        ]
    );
    assert_eq!(listing(&fx.photos), ["folder", "good.nef", "good.tiff"]);
}
