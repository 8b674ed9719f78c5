/*!
 * Read grid metadata from GOES-R NetCDF files with the system libnetcdf.
 *
 * Only the handful of accessors in [GridDataset](crate::GridDataset) are implemented. The
 * netCDF library is not thread safe, so every call into it goes through a global lock.
 */
use crate::{archive::GridDataset, GoesGridError, GoesGridResult};
use libc::{c_char, c_double, c_int, c_void, size_t};
use once_cell::sync::OnceCell;
use std::{
    ffi::{CStr, CString},
    io::Read,
    path::Path,
    sync::{Mutex, MutexGuard},
};

static_assertions::assert_eq_size!(c_double, f64);

/// Handle to an open NetCDF file.
#[derive(Debug)]
pub struct NetCdfDataset {
    /// In memory buffer if this is from a zip file, it must outlive the handle.
    _buffer: Option<Vec<u8>>,
    /// Handle to the NetCDF file
    nc_file_id: c_int,
    /// Orignial file name the dataset was loaded from.
    fname: String,
}

macro_rules! check_error {
    ($code:expr) => {
        check_netcdf_error($code, file!(), line!())
    };
}

impl NetCdfDataset {
    /// Open a `.nc` file, or a `.zip` archive holding a single `.nc` file.
    pub fn open<P: AsRef<Path>>(path: P) -> GoesGridResult<Self> {
        let p: &Path = path.as_ref();
        let fname: String = p
            .file_name()
            .map(|p| p.to_string_lossy().to_string())
            .ok_or_else(|| GoesGridError::Dataset(format!("no file name in {}", p.display())))?;

        match p.extension().and_then(|ext| ext.to_str()) {
            Some("zip") => Self::open_zip(p, fname),
            Some("nc") => Self::open_nc(p, fname),
            _ => Err(GoesGridError::Dataset(format!(
                "unsupported file type: {}",
                p.display()
            ))),
        }
    }

    fn open_zip(p: &Path, fname: String) -> GoesGridResult<Self> {
        let path_str = c_path(p)?;

        let file = std::fs::File::open(p)
            .map_err(|e| GoesGridError::storage(&p.to_string_lossy(), e))?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|e| GoesGridError::Dataset(format!("{}: {}", fname, e)))?;
        if zip.len() != 1 {
            return Err(GoesGridError::Dataset(format!(
                "{} holds {} files, expected 1",
                fname,
                zip.len()
            )));
        }

        let mut nc_file = zip
            .by_index(0)
            .map_err(|e| GoesGridError::Dataset(format!("{}: {}", fname, e)))?;
        let mut buf: Vec<u8> = Vec::with_capacity(nc_file.size() as usize + 10);
        nc_file
            .read_to_end(&mut buf)
            .map_err(|e| GoesGridError::storage(&p.to_string_lossy(), e))?;

        let _lock = netcdf_lock()?;
        let mut file_id: c_int = -1;
        unsafe {
            let status = nc_open_mem(
                path_str.as_ptr(),
                NC_NOWRITE,
                buf.len(),
                buf.as_mut_ptr() as *mut c_void,
                &mut file_id as *mut c_int,
            );
            check_error!(status)?;
        }

        Ok(NetCdfDataset {
            _buffer: Some(buf),
            nc_file_id: file_id,
            fname,
        })
    }

    fn open_nc(p: &Path, fname: String) -> GoesGridResult<Self> {
        let path_str = c_path(p)?;

        let _lock = netcdf_lock()?;
        let mut file_id: c_int = -1;
        unsafe {
            let status = nc_open(path_str.as_ptr(), NC_NOWRITE, &mut file_id as *mut c_int);
            check_error!(status)?;
        }

        Ok(NetCdfDataset {
            _buffer: None,
            nc_file_id: file_id,
            fname,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.fname
    }

    fn varid(&self, name: &str) -> GoesGridResult<c_int> {
        let cname = c_name(name)?;
        let mut varid: c_int = -1;
        unsafe {
            let status = nc_inq_varid(self.nc_file_id, cname.as_ptr(), &mut varid as *mut c_int);
            check_error!(status).map_err(|e| self.context(name, e))?;
        }
        Ok(varid)
    }

    /// Read an optional numeric attribute, `None` if it is not there.
    fn optional_attribute(&self, varid: c_int, name: &str) -> GoesGridResult<Option<f64>> {
        let cname = c_name(name)?;
        let mut val: f64 = f64::NAN;
        unsafe {
            let status = nc_get_att_double(
                self.nc_file_id,
                varid,
                cname.as_ptr(),
                &mut val as *mut c_double,
            );
            if status == NC_ENOTATT {
                return Ok(None);
            }
            check_error!(status).map_err(|e| self.context(name, e))?;
        }
        Ok(Some(val))
    }

    fn context(&self, what: &str, err: GoesGridError) -> GoesGridError {
        GoesGridError::Dataset(format!("{} [{}]: {}", self.fname, what, err))
    }
}

impl GridDataset for NetCdfDataset {
    fn dimension_len(&self, name: &str) -> GoesGridResult<usize> {
        let cname = c_name(name)?;
        let _lock = netcdf_lock()?;

        let mut dimid: c_int = -1;
        let mut len: size_t = 0;
        unsafe {
            let mut status =
                nc_inq_dimid(self.nc_file_id, cname.as_ptr(), &mut dimid as *mut c_int);
            check_error!(status).map_err(|e| self.context(name, e))?;
            status = nc_inq_dimlen(self.nc_file_id, dimid, &mut len as *mut size_t);
            check_error!(status).map_err(|e| self.context(name, e))?;
        }

        Ok(len)
    }

    fn variable_values(&self, name: &str) -> GoesGridResult<Vec<f64>> {
        let _lock = netcdf_lock()?;
        let varid = self.varid(name)?;

        let mut ndims: c_int = 0;
        unsafe {
            let status = nc_inq_varndims(self.nc_file_id, varid, &mut ndims as *mut c_int);
            check_error!(status).map_err(|e| self.context(name, e))?;
        }
        if ndims != 1 {
            return Err(self.context(
                name,
                GoesGridError::MalformedGrid(format!("expected 1 dimension, found {}", ndims)),
            ));
        }

        let mut dimid: c_int = -1;
        let mut len: size_t = 0;
        unsafe {
            let mut status = nc_inq_vardimid(self.nc_file_id, varid, &mut dimid as *mut c_int);
            check_error!(status).map_err(|e| self.context(name, e))?;
            status = nc_inq_dimlen(self.nc_file_id, dimid, &mut len as *mut size_t);
            check_error!(status).map_err(|e| self.context(name, e))?;
        }

        let mut vals: Vec<f64> = vec![0.0; len];
        unsafe {
            let status = nc_get_var_double(self.nc_file_id, varid, vals.as_mut_ptr());
            check_error!(status).map_err(|e| self.context(name, e))?;
        }

        let scale_factor = self.optional_attribute(varid, "scale_factor")?;
        let add_offset = self.optional_attribute(varid, "add_offset")?;
        if scale_factor.is_some() || add_offset.is_some() {
            let scale = scale_factor.unwrap_or(1.0);
            let offset = add_offset.unwrap_or(0.0);
            for val in vals.iter_mut() {
                *val = *val * scale + offset;
            }
        }

        Ok(vals)
    }

    fn attribute_f64(&self, variable: &str, attribute: &str) -> GoesGridResult<f64> {
        let _lock = netcdf_lock()?;
        let varid = self.varid(variable)?;

        self.optional_attribute(varid, attribute)?.ok_or_else(|| {
            GoesGridError::MalformedGrid(format!(
                "{}: {} has no attribute {}",
                self.fname, variable, attribute
            ))
        })
    }

    fn attribute_text(&self, variable: &str, attribute: &str) -> GoesGridResult<String> {
        let cname = c_name(attribute)?;
        let _lock = netcdf_lock()?;
        let varid = self.varid(variable)?;

        let mut len: size_t = 0;
        unsafe {
            let status = nc_inq_attlen(self.nc_file_id, varid, cname.as_ptr(), &mut len);
            check_error!(status).map_err(|e| self.context(attribute, e))?;
        }

        let mut buf: Vec<u8> = vec![0; len];
        unsafe {
            let status = nc_get_att_text(
                self.nc_file_id,
                varid,
                cname.as_ptr(),
                buf.as_mut_ptr() as *mut c_char,
            );
            check_error!(status).map_err(|e| self.context(attribute, e))?;
        }

        // Text attributes are not required to be nul terminated, but some are.
        while buf.last() == Some(&0) {
            buf.pop();
        }

        Ok(String::from_utf8_lossy(&buf).to_string())
    }
}

impl Drop for NetCdfDataset {
    fn drop(&mut self) {
        if let Ok(_lock) = netcdf_lock() {
            unsafe {
                let _ = nc_close(self.nc_file_id);
            }
        }
    }
}

static NETCDF_GLOBAL_LOCK: OnceCell<Mutex<()>> = OnceCell::new();

fn netcdf_lock() -> GoesGridResult<MutexGuard<'static, ()>> {
    NETCDF_GLOBAL_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .map_err(|_| GoesGridError::Dataset("netCDF lock poisoned".to_owned()))
}

fn c_name(name: &str) -> GoesGridResult<CString> {
    CString::new(name).map_err(|_| GoesGridError::Dataset(format!("invalid name: {}", name)))
}

fn c_path(p: &Path) -> GoesGridResult<CString> {
    CString::new(p.to_string_lossy().as_bytes())
        .map_err(|_| GoesGridError::Dataset(format!("invalid path: {}", p.display())))
}

const NC_NOWRITE: c_int = 0x0000;
const NC_NOERR: c_int = 0;
const NC_ENOTATT: c_int = -43;

fn check_netcdf_error(status_code: c_int, file: &'static str, line: u32) -> GoesGridResult<()> {
    if status_code != NC_NOERR {
        let msg = unsafe { CStr::from_ptr(nc_strerror(status_code)) }.to_string_lossy();
        Err(GoesGridError::Dataset(format!(
            "{}[{}]netCDF error: {}",
            file, line, msg
        )))
    } else {
        Ok(())
    }
}

#[link(name = "netcdf")]
extern "C" {
    fn nc_open(path: *const c_char, mode: c_int, ncidp: *mut c_int) -> c_int;
    fn nc_open_mem(
        name: *const c_char,
        mode: c_int,
        buf_size: size_t,
        buf: *mut c_void,
        ncidp: *mut c_int,
    ) -> c_int;
    fn nc_close(handle: c_int) -> c_int;

    fn nc_strerror(code: c_int) -> *const c_char;

    fn nc_inq_dimid(handle: c_int, name: *const c_char, rv: *mut c_int) -> c_int;
    fn nc_inq_dimlen(handle: c_int, dimid: c_int, rv: *mut size_t) -> c_int;
    fn nc_inq_varid(handle: c_int, name: *const c_char, varid: *mut c_int) -> c_int;
    fn nc_inq_varndims(handle: c_int, varid: c_int, ndims: *mut c_int) -> c_int;
    fn nc_inq_vardimid(handle: c_int, varid: c_int, dimids: *mut c_int) -> c_int;
    fn nc_inq_attlen(handle: c_int, varid: c_int, name: *const c_char, len: *mut size_t)
        -> c_int;
    fn nc_get_att_double(
        handle: c_int,
        varid: c_int,
        name: *const c_char,
        val: *mut c_double,
    ) -> c_int;
    fn nc_get_att_text(handle: c_int, varid: c_int, name: *const c_char, val: *mut c_char)
        -> c_int;
    fn nc_get_var_double(handle: c_int, varid: c_int, vals: *mut c_double) -> c_int;
}
