//! Routines injected into hosted content so it keys its own video output.
//!
//! The keying routine draws the first `<video>` element into a full-page canvas on
//! every animation frame and zeroes the alpha of pixels inside the tolerance
//! sphere around the key colour, using the same inclusive squared-distance test as
//! [`crate::compositor::chroma`]. It waits for the video to report a size before
//! starting and replaces any canvas left by an earlier injection.

use crate::compositor::chroma::ChromaKeyConfig;

pub const CANVAS_ELEMENT_ID: &str = "overlay-key-canvas";
const RETRY_MS: u32 = 1000;

pub fn keying_routine(config: &ChromaKeyConfig) -> String {
    let key = config.key;
    let tolerance = config.tolerance;
    format!(
        r#"(function install() {{
  const root = document.documentElement;
  root.style.background = 'transparent';
  document.body.style.background = 'transparent';
  document.body.style.margin = '0';
  document.body.style.overflow = 'hidden';

  const video = document.querySelector('video');
  if (!video || video.videoWidth === 0 || video.videoHeight === 0) {{
    setTimeout(install, {RETRY_MS});
    return;
  }}

  const stale = document.getElementById('{CANVAS_ELEMENT_ID}');
  if (stale) {{
    if (stale.__stopKeying) stale.__stopKeying();
    stale.remove();
  }}

  const canvas = document.createElement('canvas');
  canvas.id = '{CANVAS_ELEMENT_ID}';
  canvas.width = video.videoWidth;
  canvas.height = video.videoHeight;
  canvas.style.cssText = 'position:fixed;inset:0;width:100%;height:100%;' +
    'object-fit:contain;pointer-events:none;background:transparent;z-index:2147483647;';
  video.style.visibility = 'hidden';
  document.body.appendChild(canvas);

  const ctx = canvas.getContext('2d', {{ alpha: true, willReadFrequently: true }});
  const keyR = {r}, keyG = {g}, keyB = {b};
  const limit = {tolerance} * {tolerance};
  let running = true;
  canvas.__stopKeying = () => {{ running = false; }};

  function step() {{
    if (!running) return;
    if (video.readyState >= 2 && !video.paused && !video.ended) {{
      ctx.drawImage(video, 0, 0, canvas.width, canvas.height);
      const image = ctx.getImageData(0, 0, canvas.width, canvas.height);
      const data = image.data;
      for (let i = 0; i < data.length; i += 4) {{
        const dr = data[i] - keyR;
        const dg = data[i + 1] - keyG;
        const db = data[i + 2] - keyB;
        if (dr * dr + dg * dg + db * db <= limit) data[i + 3] = 0;
      }}
      ctx.putImageData(image, 0, 0);
    }}
    requestAnimationFrame(step);
  }}
  requestAnimationFrame(step);
}})();"#,
        r = key.r,
        g = key.g,
        b = key.b,
    )
}

pub fn removal_routine() -> String {
    format!(
        r#"(function () {{
  const canvas = document.getElementById('{CANVAS_ELEMENT_ID}');
  if (canvas) {{
    if (canvas.__stopKeying) canvas.__stopKeying();
    canvas.remove();
  }}
  const video = document.querySelector('video');
  if (video) video.style.visibility = '';
  document.documentElement.style.background = '';
  document.body.style.background = '';
}})();"#
    )
}
