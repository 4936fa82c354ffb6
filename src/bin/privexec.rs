fn main() {
    privexec::cli::run()
}
