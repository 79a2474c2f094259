fn main() -> std::process::ExitCode {
    caja_diaria_lib::run()
}
