// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

// 构建脚本: 静态 FFmpeg 在 Windows 上采集摄像头时需要的系统库
fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(all(target_os = "windows", target_env = "msvc"))]
    {
        // DirectShow 设备枚举与采集
        for lib in ["strmiids", "ole32", "oleaut32", "uuid"] {
            println!("cargo:rustc-link-lib=dylib={}", lib);
        }
        // Video for Windows
        println!("cargo:rustc-link-lib=dylib=vfw32");
        // ffmpeg 网络协议层依赖
        println!("cargo:rustc-link-lib=dylib=secur32");
        println!("cargo:rustc-link-lib=dylib=ws2_32");
    }
}
